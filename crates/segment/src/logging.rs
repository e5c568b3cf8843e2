//! `tracing` target for segment I/O events, nested under the engine's.

pub(crate) const LOG_TARGET: &str = "strata::segment";
