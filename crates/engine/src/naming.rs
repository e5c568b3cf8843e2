//! Segment filenames.
//!
//! ```text
//! {db}/{table}.keys.{id}                     flushed keys file
//! {db}/{table}.data.{id}                     flushed data file
//! {db}/{table}.merged..{seq}.keys.{id}       merged keys file
//! {db}/{table}.merged..{seq}.data.{id}       merged data file
//! ```
//!
//! The last component is always the segment id. `seq` comes from a single
//! process-wide counter, so two merges never pick the same name even when
//! they merge runs ending in the same id. Opening a table raises the
//! counter past every `seq` its manifest already names, so names stay
//! unique across restarts too.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static MERGE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Returns the next merge sequence number (starts at 1).
pub fn next_merge_seq() -> u64 {
    MERGE_SEQ.fetch_add(1, Ordering::Relaxed) + 1
}

/// Raises the counter so the next sequence number is above `seq`.
pub fn observe_merge_seq(seq: u64) {
    MERGE_SEQ.fetch_max(seq, Ordering::Relaxed);
}

/// The `seq` of a merged segment filename of `table`, or `None` for any
/// other file.
pub fn merge_seq_of(filename: &str, table: &str) -> Option<u64> {
    filename
        .strip_prefix(table)?
        .strip_prefix(".merged..")?
        .split('.')
        .next()?
        .parse()
        .ok()
}

pub fn segment_paths(dir: &Path, table: &str, id: u64) -> (PathBuf, PathBuf) {
    (
        dir.join(format!("{}.keys.{}", table, id)),
        dir.join(format!("{}.data.{}", table, id)),
    )
}

pub fn merged_segment_paths(dir: &Path, table: &str, seq: u64, id: u64) -> (PathBuf, PathBuf) {
    let base = format!("{}.merged.", table);
    (
        dir.join(format!("{}.{}.keys.{}", base, seq, id)),
        dir.join(format!("{}.{}.data.{}", base, seq, id)),
    )
}

/// Manifest file of `table`.
pub fn manifest_path(dir: &Path, table: &str) -> PathBuf {
    dir.join(format!("{}.manifest", table))
}

/// Returns `true` if `filename` belongs to `table` (segment, manifest or a
/// leftover temp file).
pub fn belongs_to(filename: &str, table: &str) -> bool {
    filename
        .strip_prefix(table)
        .map_or(false, |rest| rest.starts_with('.'))
}
