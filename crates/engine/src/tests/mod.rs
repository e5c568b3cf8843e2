mod table_tests;

use crate::*;
use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

/// Options for tests that drive merging by hand.
pub(crate) fn manual_options() -> Options {
    Options::default()
        .with_background_merge(false)
        .with_backoff(Duration::from_millis(1))
}

/// Writes `count` keys `k{round}-{i}` and flushes, once per round, so the
/// table gains `rounds` disk segments.
pub(crate) fn fill(table: &Table, rounds: usize, count: usize) -> anyhow::Result<()> {
    for round in 0..rounds {
        for i in 0..count {
            table.put(
                format!("k{:02}-{:04}", round, i).into_bytes(),
                format!("v{}", round).into_bytes(),
            )?;
        }
        table.flush()?;
    }
    Ok(())
}

/// Sorted names of files in `dir`.
pub(crate) fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

pub(crate) fn merged_files(dir: &Path) -> Vec<String> {
    file_names(dir)
        .into_iter()
        .filter(|n| n.contains(".merged..") && !n.ends_with(".tmp"))
        .collect()
}

/// Polls `cond` every few milliseconds for up to five seconds.
pub(crate) fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}
