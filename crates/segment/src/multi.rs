//! K-way merge over an ordered list of segments.
//!
//! Produces `(key, value)` pairs in ascending key order with at most one
//! pair per key. When a key appears in several segments the value from the
//! **later** segment in the input list wins, since segments are ordered
//! oldest to newest.
//!
//! This is the core primitive for compaction: a run of disk segments is
//! wrapped in a [`MultiSegment`], looked up unbounded, and streamed into a
//! new segment.

use anyhow::Result;

use crate::{Segment, SegmentIterator};

/// A read-only view over several segments, ordered oldest first.
#[derive(Debug, Clone)]
pub struct MultiSegment {
    segments: Vec<Segment>,
}

impl MultiSegment {
    pub fn new(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Opens one sub-iterator per segment over `[start, end)` and primes
    /// each with its first entry.
    ///
    /// # Errors
    ///
    /// Fails if any segment fails to open its range or to produce its first
    /// entry.
    pub fn lookup(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> Result<MultiSegmentIterator> {
        let mut sources = Vec::with_capacity(self.segments.len());
        let mut heads = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            let mut iter = segment.lookup(start, end)?;
            heads.push(iter.next_entry()?);
            sources.push(iter);
        }
        Ok(MultiSegmentIterator { sources, heads })
    }
}

/// Iterator returned by [`MultiSegment::lookup`].
///
/// Not restartable: once [`next_entry`](MultiSegmentIterator::next_entry)
/// returns `Ok(None)` it stays exhausted.
pub struct MultiSegmentIterator {
    sources: Vec<SegmentIterator>,
    /// Current entry of each source; `None` once that source is drained.
    heads: Vec<Option<(Vec<u8>, Vec<u8>)>>,
}

impl MultiSegmentIterator {
    /// Returns the next `(key, value)` in sorted order, or `None` when all
    /// sources are exhausted.
    ///
    /// Each step scans the heads linearly: the run length is bounded, so a
    /// heap buys nothing here.
    pub fn next_entry(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let mut winner: Option<usize> = None;
        for (i, head) in self.heads.iter().enumerate() {
            let Some((key, _)) = head else { continue };
            winner = match winner {
                // `<=` so that on a tie the later source takes over.
                Some(w) => match &self.heads[w] {
                    Some((best, _)) if key <= best => Some(i),
                    _ => Some(w),
                },
                None => Some(i),
            };
        }

        let Some(w) = winner else {
            return Ok(None);
        };
        let Some((key, value)) = self.heads[w].take() else {
            return Ok(None);
        };
        self.heads[w] = self.sources[w].next_entry()?;

        // Drop superseded copies of the same key from older sources.
        for i in 0..self.heads.len() {
            while matches!(&self.heads[i], Some((k, _)) if *k == key) {
                self.heads[i] = self.sources[i].next_entry()?;
            }
        }

        Ok(Some((key, value)))
    }

    /// Collects all remaining entries into a `Vec`.
    pub fn collect_all(&mut self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut result = Vec::new();
        while let Some(pair) = self.next_entry()? {
            result.push(pair);
        }
        Ok(result)
    }
}
