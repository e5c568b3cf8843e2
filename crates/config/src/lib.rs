//! # Config - StrataKV tunables
//!
//! A single [`Options`] struct carries every knob the engine reads. Values
//! come from [`Options::default`], builder-style setters, or the process
//! environment via [`Options::from_env`].
//!
//! ```text
//! STRATA_SEGMENT_COUNT       per-table segment ceiling        (default: 8)
//! STRATA_MERGE_INTERVAL_MS   scheduler pause between sweeps   (default: 1000)
//! STRATA_BACKOFF_MS          merge backoff / drain pause      (default: 100)
//! STRATA_BACKGROUND_MERGE    start the merge scheduler        (default: "true")
//! ```

use anyhow::{Context, Result};
use std::time::Duration;

/// Default per-table segment ceiling. Tables at or below this count are
/// never merged.
pub const DEFAULT_SEGMENT_COUNT: usize = 8;

/// Default pause between two scheduler sweeps.
pub const DEFAULT_MERGE_INTERVAL: Duration = Duration::from_secs(1);

/// Default pause used by the table merge loop (backoff, transaction drain,
/// and between passes).
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(100);

/// Engine options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Segment count at or below which a table is considered compact.
    pub segment_count: usize,
    /// Fixed pause between background sweeps.
    pub merge_interval: Duration,
    /// Fixed pause inside the table merge loop.
    pub backoff: Duration,
    /// Whether `Database::open` starts the background merge thread.
    pub background_merge: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            segment_count: DEFAULT_SEGMENT_COUNT,
            merge_interval: DEFAULT_MERGE_INTERVAL,
            backoff: DEFAULT_BACKOFF,
            background_merge: true,
        }
    }
}

/// Reads a configuration value from the environment, if set.
fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env_var(key) {
        Some(raw) => {
            let parsed = raw
                .trim()
                .parse::<T>()
                .with_context(|| format!("invalid value for {}: {:?}", key, raw))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

impl Options {
    /// Builds options from the defaults, overridden by any `STRATA_*`
    /// environment variables that are set.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but does not parse, or if the
    /// resulting options fail [`validate`](Options::validate).
    pub fn from_env() -> Result<Self> {
        let mut opts = Self::default();
        if let Some(n) = parse_env::<usize>("STRATA_SEGMENT_COUNT")? {
            opts.segment_count = n;
        }
        if let Some(ms) = parse_env::<u64>("STRATA_MERGE_INTERVAL_MS")? {
            opts.merge_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_env::<u64>("STRATA_BACKOFF_MS")? {
            opts.backoff = Duration::from_millis(ms);
        }
        if let Some(b) = parse_env::<bool>("STRATA_BACKGROUND_MERGE")? {
            opts.background_merge = b;
        }
        opts.validate()?;
        Ok(opts)
    }

    /// Checks that the options are usable.
    ///
    /// The ceiling must be at least 2: a table always ends in its live memory
    /// segment, and below 2 a single disk segment plus that memory segment
    /// would exceed the ceiling with no mergeable run left.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.segment_count >= 2, "segment_count must be at least 2");
        Ok(())
    }

    #[must_use]
    pub fn with_segment_count(mut self, segment_count: usize) -> Self {
        self.segment_count = segment_count;
        self
    }

    #[must_use]
    pub fn with_merge_interval(mut self, interval: Duration) -> Self {
        self.merge_interval = interval;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_background_merge(mut self, enabled: bool) -> Self {
        self.background_merge = enabled;
        self
    }
}
