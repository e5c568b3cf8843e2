//! Single `tracing` target for engine events.
//!
//! Events carry structured fields (`table`, `segments`, `id`, ...) rather
//! than formatted prose. The library never installs a subscriber.

pub(crate) const LOG_TARGET: &str = "strata";
