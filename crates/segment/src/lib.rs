//! # Segment - sorted key/value ranges
//!
//! A table in StrataKV is an ordered list of segments, oldest first. Every
//! segment answers the same question: "give me an ascending iterator over
//! `[start, end)`". There are exactly three kinds:
//!
//! | Variant                 | Backing                         | Mutable |
//! |-------------------------|---------------------------------|---------|
//! | [`Segment::Memory`]     | [`memtable::MemorySegment`]     | yes     |
//! | [`Segment::Disk`]       | [`DiskSegment`] (keys + data)   | no      |
//! | [`Segment::Multi`]      | [`MultiSegment`] k-way merge    | no      |
//!
//! Compaction only ever merges [`Segment::Disk`] entries; the other
//! variants are told apart with [`Segment::as_disk`].
//!
//! ## File layout
//!
//! ```text
//! ┌───────────────────────────────┐   ┌───────────────────────────────┐
//! │ KEYS FILE                     │   │ DATA FILE                     │
//! │ key_len (u32) | key |         │   │ crc32 (u32) | val_len (u32) | │
//! │ data_offset (u64)  ───────────┼──>│ value                         │
//! │ ... one per key, ascending    │   │ ... one per key               │
//! ├───────────────────────────────┤   ├───────────────────────────────┤
//! │ record_count (u64) | "SGK1"   │   │ record_count (u64) | "SGD1"   │
//! └───────────────────────────────┘   └───────────────────────────────┘
//! ```
//!
//! See [`format`] for the constants.

pub mod format;
mod disk;
mod logging;
mod multi;
mod writer;

use anyhow::Result;
use memtable::MemorySegment;
use parking_lot::RwLock;
use std::sync::Arc;

pub use disk::{segment_id_from_path, DiskSegment, DiskSegmentIterator};
pub use multi::{MultiSegment, MultiSegmentIterator};
pub use writer::{tmp_path, write_and_load_segment, write_memory_segment};

/// One storage unit of a table.
///
/// Cloning is cheap: every variant is a shared handle, and two clones of
/// the same handle compare equal under [`Segment::same`].
#[derive(Clone)]
pub enum Segment {
    Memory(Arc<RwLock<MemorySegment>>),
    Disk(Arc<DiskSegment>),
    Multi(Arc<MultiSegment>),
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Segment::Memory(m) => write!(f, "Memory(entries={})", m.read().len()),
            Segment::Disk(d) => write!(f, "Disk(id={})", d.id()),
            Segment::Multi(m) => write!(f, "Multi({:?})", m.segments()),
        }
    }
}

impl Segment {
    /// Wraps a fresh memory segment.
    pub fn memory(mem: MemorySegment) -> Self {
        Segment::Memory(Arc::new(RwLock::new(mem)))
    }

    pub fn disk(disk: DiskSegment) -> Self {
        Segment::Disk(Arc::new(disk))
    }

    pub fn multi(segments: Vec<Segment>) -> Self {
        Segment::Multi(Arc::new(MultiSegment::new(segments)))
    }

    /// Returns the disk segment if this is the on-disk variant.
    pub fn as_disk(&self) -> Option<&Arc<DiskSegment>> {
        match self {
            Segment::Disk(d) => Some(d),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_disk(&self) -> bool {
        matches!(self, Segment::Disk(_))
    }

    /// Identity comparison: `true` only if both refer to the same shared
    /// segment object.
    #[must_use]
    pub fn same(&self, other: &Segment) -> bool {
        match (self, other) {
            (Segment::Memory(a), Segment::Memory(b)) => Arc::ptr_eq(a, b),
            (Segment::Disk(a), Segment::Disk(b)) => Arc::ptr_eq(a, b),
            (Segment::Multi(a), Segment::Multi(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Opens an ascending iterator over `start <= key < end`.
    ///
    /// `None` leaves that side open. A memory segment is snapshotted at
    /// call time.
    ///
    /// # Errors
    ///
    /// Fails if the segment (or any segment under a multi) cannot open the
    /// range, e.g. because its files were already closed.
    pub fn lookup(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> Result<SegmentIterator> {
        match self {
            Segment::Memory(m) => Ok(SegmentIterator::Memory(m.read().range(start, end).into_iter())),
            Segment::Disk(d) => Ok(SegmentIterator::Disk(d.lookup(start, end)?)),
            Segment::Multi(m) => Ok(SegmentIterator::Multi(Box::new(m.lookup(start, end)?))),
        }
    }

    /// Point lookup for `key`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self {
            Segment::Memory(m) => Ok(m.read().get(key).map(|v| v.to_vec())),
            Segment::Disk(d) => d.get(key),
            Segment::Multi(m) => {
                // [key, key\0) holds exactly `key`
                let mut end = key.to_vec();
                end.push(0);
                let mut iter = m.lookup(Some(key), Some(&end))?;
                Ok(iter.next_entry()?.map(|(_, v)| v))
            }
        }
    }
}

/// Ascending iterator produced by [`Segment::lookup`].
///
/// [`next_entry`](SegmentIterator::next_entry) separates exhaustion
/// (`Ok(None)`) from failure (`Err`). The `Iterator` impl maps the same
/// onto `Option<Result<_>>`.
pub enum SegmentIterator {
    Memory(std::vec::IntoIter<(Vec<u8>, Vec<u8>)>),
    Disk(DiskSegmentIterator),
    Multi(Box<MultiSegmentIterator>),
}

impl SegmentIterator {
    pub fn next_entry(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        match self {
            SegmentIterator::Memory(it) => Ok(it.next()),
            SegmentIterator::Disk(it) => it.next_entry(),
            SegmentIterator::Multi(it) => it.next_entry(),
        }
    }
}

impl Iterator for SegmentIterator {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().transpose()
    }
}

#[cfg(test)]
mod tests;
