//! Tables: an ordered segment list plus a transaction count.
//!
//! ```text
//! segments:  [ disk 1 | disk 2 | ... | disk n | memory ]
//!              oldest ──────────────────────────> newest
//! ```
//!
//! The last segment is always the live [`MemorySegment`]. A flush freezes it,
//! appends a fresh one, writes the frozen one to disk and swaps the disk
//! segment into the frozen one's position. Flushes run one at a time, so a
//! frozen segment is always directly followed by the live one; if its write
//! fails it is folded back into the live segment, keeping memory segments
//! at the tail.

use anyhow::{Context, Result};
use memtable::MemorySegment;
use parking_lot::{Mutex, MutexGuard, RwLock};
use segment::{segment_id_from_path, write_memory_segment, DiskSegment, Segment, SegmentIterator};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::logging::LOG_TARGET;
use crate::manifest::Manifest;
use crate::{compaction, naming, MAX_KEY_SIZE, MAX_VALUE_SIZE};

/// State guarded by the table lock.
pub(crate) struct TableState {
    /// Oldest first. Order is load-bearing: later segments shadow earlier ones.
    pub(crate) segments: Vec<Segment>,
    /// Number of live [`Transaction`]s.
    pub(crate) transactions: usize,
    pub(crate) manifest: Manifest,
}

impl TableState {
    /// Rewrites the manifest from the current segment list.
    pub(crate) fn save_manifest(&mut self) -> Result<()> {
        self.manifest.set_segments(&self.segments);
        self.manifest.save()
    }
}

pub struct Table {
    name: String,
    dir: PathBuf,
    /// Id for the next flushed segment.
    next_id: AtomicU64,
    /// Serializes flushes. Never taken while holding `state`.
    flush_lock: Mutex<()>,
    state: Mutex<TableState>,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Table")
            .field("name", &self.name)
            .field("segments", &state.segments)
            .field("transactions", &state.transactions)
            .finish()
    }
}

impl Table {
    /// Creates a brand-new, empty table and writes its (empty) manifest.
    pub(crate) fn create(dir: &Path, name: &str) -> Result<Self> {
        let manifest = Manifest::load_or_create(&naming::manifest_path(dir, name))?;
        manifest.save()?;
        Ok(Self::from_parts(dir, name, Vec::new(), manifest, 1))
    }

    /// Rebuilds a table from its manifest.
    ///
    /// Segment files and temp files of this table that the manifest does not
    /// list are left over from an interrupted flush or merge and are deleted.
    pub(crate) fn open(dir: &Path, name: &str) -> Result<Self> {
        let manifest = Manifest::load_or_create(&naming::manifest_path(dir, name))?;

        let mut segments = Vec::with_capacity(manifest.entries.len() + 1);
        let mut max_id = 0u64;
        for entry in &manifest.entries {
            let disk = DiskSegment::open(dir.join(&entry.keys), dir.join(&entry.data))
                .with_context(|| format!("table {}: failed to open segment {}", name, entry.keys))?;
            max_id = max_id.max(disk.id());
            if let Some(seq) = naming::merge_seq_of(&entry.keys, name) {
                naming::observe_merge_seq(seq);
            }
            segments.push(Segment::disk(disk));
        }

        remove_orphans(dir, name, &manifest)?;

        Ok(Self::from_parts(dir, name, segments, manifest, max_id + 1))
    }

    fn from_parts(
        dir: &Path,
        name: &str,
        mut segments: Vec<Segment>,
        manifest: Manifest,
        next_id: u64,
    ) -> Self {
        segments.push(Segment::memory(MemorySegment::new()));
        Self {
            name: name.to_string(),
            dir: dir.to_path_buf(),
            next_id: AtomicU64::new(next_id),
            flush_lock: Mutex::new(()),
            state: Mutex::new(TableState {
                segments,
                transactions: 0,
                manifest,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, TableState> {
        self.state.lock()
    }

    /// Copies out the current segment list.
    pub fn segments(&self) -> Vec<Segment> {
        self.state.lock().segments.clone()
    }

    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.state.lock().segments.len()
    }

    #[must_use]
    pub fn disk_segment_count(&self) -> usize {
        self.state.lock().segments.iter().filter(|s| s.is_disk()).count()
    }

    #[must_use]
    pub fn transactions(&self) -> usize {
        self.state.lock().transactions
    }

    /// Starts a transaction. While any transaction is alive, compaction will
    /// not release the files of segments it has merged away.
    pub fn begin(self: &Arc<Self>) -> Transaction {
        self.state.lock().transactions += 1;
        Transaction {
            table: Arc::clone(self),
        }
    }

    /// Writes `key` into the live memory segment.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        anyhow::ensure!(!key.is_empty(), "key must not be empty");
        anyhow::ensure!(
            key.len() <= MAX_KEY_SIZE,
            "key too large: {} bytes (max {})",
            key.len(),
            MAX_KEY_SIZE
        );
        anyhow::ensure!(
            value.len() <= MAX_VALUE_SIZE,
            "value too large: {} bytes (max {})",
            value.len(),
            MAX_VALUE_SIZE
        );

        let state = self.state.lock();
        match state.segments.last() {
            Some(Segment::Memory(live)) => {
                live.write().put(key, value);
                Ok(())
            }
            _ => anyhow::bail!("table {}: newest segment is not a memory segment", self.name),
        }
    }

    /// Point lookup through a short-lived transaction.
    pub fn get(self: &Arc<Self>, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.begin().get(key)
    }

    /// Freezes the live memory segment into a new disk segment.
    ///
    /// No-op if the live segment is empty. The table lock is not held while
    /// the segment files are written.
    ///
    /// # Errors
    ///
    /// On a write failure the frozen entries are folded back into the live
    /// segment, so nothing acknowledged is lost and a later flush retries.
    pub fn flush(&self) -> Result<()> {
        let _flushing = self.flush_lock.lock();
        let frozen = {
            let mut state = self.state.lock();
            let live = match state.segments.last() {
                Some(Segment::Memory(m)) if !m.read().is_empty() => Arc::clone(m),
                _ => return Ok(()),
            };
            state.segments.push(Segment::memory(MemorySegment::new()));
            live
        };

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (key_path, data_path) = naming::segment_paths(&self.dir, &self.name, id);
        let written = write_memory_segment(&key_path, &data_path, &frozen.read());
        let disk = match written {
            Ok(disk) => disk,
            Err(e) => {
                self.unfreeze(&frozen);
                return Err(e.context(format!("table {}: failed to flush segment {}", self.name, id)));
            }
        };
        let entries = disk.len();

        let mut state = self.state.lock();
        let frozen = Segment::Memory(frozen);
        let pos = state
            .segments
            .iter()
            .position(|s| s.same(&frozen))
            .ok_or_else(|| anyhow::anyhow!("table {}: frozen segment vanished during flush", self.name))?;
        state.segments[pos] = Segment::disk(disk);
        state.save_manifest()?;

        tracing::debug!(target: LOG_TARGET, table = %self.name, id, entries, "flushed memory segment");
        Ok(())
    }

    /// Moves the entries of a frozen segment whose flush failed into the
    /// live segment, without overwriting newer values, and drops it from the
    /// list.
    pub(crate) fn unfreeze(&self, frozen: &Arc<RwLock<MemorySegment>>) {
        let mut state = self.state.lock();
        let frozen_segment = Segment::Memory(Arc::clone(frozen));
        let Some(pos) = state.segments.iter().position(|s| s.same(&frozen_segment)) else {
            return;
        };
        if pos + 1 == state.segments.len() {
            return;
        }
        let Some(Segment::Memory(live)) = state.segments.last() else {
            return;
        };
        {
            let mut live = live.write();
            for (key, value) in frozen.read().iter() {
                if live.get(key).is_none() {
                    live.put(key.clone(), value.clone());
                }
            }
        }
        state.segments.remove(pos);
        tracing::warn!(target: LOG_TARGET, table = %self.name, "flush failed, entries kept in memory");
    }

    /// Merges disk segments until at most `segment_count` segments remain.
    /// See [`compaction::merge_table_segments`].
    pub fn merge_segments(&self, segment_count: usize, backoff: Duration) -> Result<()> {
        compaction::merge_table_segments(self, segment_count, backoff)
    }

    #[cfg(test)]
    pub(crate) fn mutate_segments(&self, f: impl FnOnce(&mut Vec<Segment>)) {
        f(&mut self.state.lock().segments);
    }
}

/// Deletes files of `table` in `dir` that `manifest` does not reference.
fn remove_orphans(dir: &Path, table: &str, manifest: &Manifest) -> Result<()> {
    let manifest_name = naming::manifest_path(dir, table);
    for entry in std::fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        if path == manifest_name || !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !naming::belongs_to(name, table) || manifest.references(name) {
            continue;
        }
        // Only segment files (numeric id suffix) and temp files are ours.
        if name.ends_with(".tmp") || segment_id_from_path(&path).is_ok() {
            std::fs::remove_file(&path)
                .with_context(|| format!("failed to remove orphan {}", path.display()))?;
            tracing::info!(target: LOG_TARGET, table, file = name, "removed orphaned file");
        }
    }
    Ok(())
}

/// A counted reader/writer on one table.
///
/// Created by [`Table::begin`]; the count is released on drop.
pub struct Transaction {
    table: Arc<Table>,
}

impl Transaction {
    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.table.put(key, value)
    }

    /// Returns the newest value for `key`, searching newest segment first.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        for segment in self.table.segments().iter().rev() {
            if let Some(value) = segment.get(key)? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// Range scan over `[start, end)` across every segment, newest value per
    /// key. The iterator cannot outlive the transaction.
    pub fn lookup(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> Result<TableIterator<'_>> {
        let inner = Segment::multi(self.table.segments()).lookup(start, end)?;
        Ok(TableIterator {
            inner,
            _txn: PhantomData,
        })
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        let mut state = self.table.state.lock();
        state.transactions = state.transactions.saturating_sub(1);
    }
}

/// Range iterator tied to a [`Transaction`].
pub struct TableIterator<'a> {
    inner: SegmentIterator,
    _txn: PhantomData<&'a Transaction>,
}

impl TableIterator<'_> {
    pub fn next_entry(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.inner.next_entry()
    }
}

impl Iterator for TableIterator<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}
