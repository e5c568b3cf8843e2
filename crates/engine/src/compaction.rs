//! Compaction: folds contiguous runs of disk segments into one.
//!
//! A pass picks a run of disk segments, streams it through a
//! [`MultiSegment`](segment::MultiSegment) into a new segment with no lock
//! held, then re-takes the table lock to verify the run is still in place,
//! splice the new segment in and release the old files. The table lock is
//! only held for the snapshot and the splice.

use anyhow::{anyhow, Result};
use parking_lot::MutexGuard;
use segment::{write_and_load_segment, DiskSegment, Segment};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::error::CompactionError;
use crate::logging::LOG_TARGET;
use crate::table::{Table, TableState};
use crate::{naming, Database};

/// Smallest run worth merging when a table is large.
const MIN_MERGE_SIZE: usize = 4;

/// Merges disk segments of `table` until it holds at most `segment_count`
/// segments.
///
/// Each pass merges up to `max(4, len / 2)` contiguous disk segments starting
/// at a cursor. A rejected run (fewer than two disk segments before the end
/// or a non-disk segment) resets the cursor and backs off; a successful
/// pass moves the cursor forward by one so later passes slide across the
/// table. `backoff` is the fixed pause used between passes, while waiting
/// for transactions to drain, and after a rejected run.
///
/// # Errors
///
/// I/O failures while merging, writing or releasing files, and
/// [`CompactionError::SegmentChanged`] when the segment list was changed
/// under the merge. All of them are fatal for the caller.
pub fn merge_table_segments(table: &Table, segment_count: usize, backoff: Duration) -> Result<()> {
    merge_table_segments_until(table, segment_count, backoff, || false)
}

/// [`merge_table_segments`] that also returns early, between passes, once
/// `stop` reports true. A pass that has started always runs to completion.
pub(crate) fn merge_table_segments_until(
    table: &Table,
    segment_count: usize,
    backoff: Duration,
    stop: impl Fn() -> bool,
) -> Result<()> {
    let mut index = 0usize;

    loop {
        if stop() {
            tracing::debug!(target: LOG_TARGET, table = table.name(), "merge stopped between passes");
            return Ok(());
        }

        let segments = table.segments();
        if segments.len() <= segment_count {
            return Ok(());
        }

        let max_merge_size = (segments.len() / 2).max(MIN_MERGE_SIZE);

        let mergeable: Vec<Arc<DiskSegment>> = segments
            .iter()
            .skip(index)
            .map_while(|s| s.as_disk().cloned())
            .take(max_merge_size)
            .collect();

        if mergeable.len() < 2 {
            tracing::trace!(target: LOG_TARGET, table = table.name(), index, "no mergeable run, backing off");
            index = 0;
            thread::sleep(backoff);
            continue;
        }

        // Segments are ordered, so the last one in the run is the newest.
        let id = mergeable[mergeable.len() - 1].id();
        let run = &segments[index..index + mergeable.len()];

        let merged = merge_run(table.dir(), table.name(), id, run)?;
        let merged_entries = merged.len();

        let mut state = lock_drained(table, backoff);

        if let Some(position) = find_changed(&state.segments, index, run) {
            drop(state);
            discard(&merged);
            return Err(CompactionError::SegmentChanged {
                table: table.name().to_string(),
                position,
            }
            .into());
        }

        let mut spliced = Vec::with_capacity(state.segments.len() - run.len() + 1);
        spliced.extend_from_slice(&state.segments[..index]);
        spliced.push(Segment::disk(merged));
        spliced.extend_from_slice(&state.segments[index + run.len()..]);

        // Record the new list before any old file disappears, and install
        // it before the old handles close: a release failure must not leave
        // closed segments in the list.
        state.manifest.set_segments(&spliced);
        state.manifest.save()?;
        state.segments = spliced;

        let mut released = Ok(());
        for segment in &mergeable {
            if let Err(e) = release(table.name(), segment) {
                if released.is_ok() {
                    released = Err(e);
                }
            }
        }
        released?;

        tracing::info!(
            target: LOG_TARGET,
            table = table.name(),
            index,
            merged = run.len(),
            id,
            entries = merged_entries,
            remaining = state.segments.len(),
            "merged segments"
        );

        index += 1;
        drop(state);
        thread::sleep(backoff);
    }
}

/// Writes the merge of `run` to a new uniquely named segment.
fn merge_run(dir: &Path, table: &str, id: u64, run: &[Segment]) -> Result<DiskSegment> {
    let seq = naming::next_merge_seq();
    let (key_path, data_path) = naming::merged_segment_paths(dir, table, seq, id);

    let mut iter = Segment::multi(run.to_vec()).lookup(None, None)?;
    write_and_load_segment(&key_path, &data_path, &mut iter)
}

/// Takes the table lock once no transaction is active.
fn lock_drained(table: &Table, backoff: Duration) -> MutexGuard<'_, TableState> {
    let mut state = table.lock();
    while state.transactions > 0 {
        tracing::debug!(
            target: LOG_TARGET,
            table = table.name(),
            transactions = state.transactions,
            "waiting for transactions to drain"
        );
        MutexGuard::unlocked(&mut state, || thread::sleep(backoff));
    }
    state
}

/// Returns the first position at which `current` no longer holds `run`
/// starting at `index`.
fn find_changed(current: &[Segment], index: usize, run: &[Segment]) -> Option<usize> {
    run.iter().enumerate().find_map(|(i, expected)| {
        match current.get(index + i) {
            Some(s) if s.same(expected) => None,
            _ => Some(index + i),
        }
    })
}

/// Closes both handles of a merged-away segment and deletes both files.
///
/// All four steps are attempted; their failures are reported together.
fn release(table: &str, segment: &DiskSegment) -> Result<()> {
    let mut errors = Vec::new();

    if let Err(e) = segment.close_key_file() {
        errors.push(e);
    }
    if let Err(e) = segment.close_data_file() {
        errors.push(e);
    }
    for path in [segment.key_path(), segment.data_path()] {
        if let Err(e) = std::fs::remove_file(path) {
            errors.push(anyhow!(e).context(format!("failed to remove {}", path.display())));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(CompactionError::Cleanup {
            table: table.to_string(),
            segment: segment.id(),
            errors,
        }
        .into())
    }
}

/// Best-effort removal of a merge result that will not be installed.
fn discard(segment: &DiskSegment) {
    let _ = segment.close_key_file();
    let _ = segment.close_data_file();
    let _ = std::fs::remove_file(segment.key_path());
    let _ = std::fs::remove_file(segment.data_path());
}

impl Database {
    /// Runs [`merge_table_segments`] over every table, one after another.
    ///
    /// The table list is snapshotted up front; tables created during the
    /// sweep wait for the next one. Stops at the first failing table, and
    /// between passes once the database starts closing.
    pub fn merge_disk_segments(&self, segment_count: usize) -> Result<()> {
        let tables = self.table_snapshot();
        for table in tables {
            merge_table_segments_until(&table, segment_count, self.options().backoff, || {
                self.is_closing()
            })?;
        }
        Ok(())
    }
}
