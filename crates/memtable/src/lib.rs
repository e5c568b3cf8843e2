//! # Memtable - the live in-memory segment
//!
//! Every table keeps exactly one [`MemorySegment`] at the newest end of its
//! segment list. Writes land here; a flush freezes its contents into an
//! on-disk segment and a fresh memory segment takes its place.
//!
//! Compaction never touches a memory segment.

use std::collections::BTreeMap;
use std::ops::Bound;

/// Mutable sorted key/value map with an approximate byte size.
#[derive(Debug)]
pub struct MemorySegment {
    map: BTreeMap<Vec<u8>, Vec<u8>>,
    approx_size: usize,
}

impl MemorySegment {
    pub fn new() -> Self {
        Self {
            map: BTreeMap::new(),
            approx_size: 0,
        }
    }

    /// Inserts or replaces the value for `key`.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        let key_len = key.len();
        let value_len = value.len();
        match self.map.insert(key, value) {
            // key bytes were already counted by the previous insert
            Some(old) => {
                self.approx_size = self.approx_size.saturating_sub(old.len()) + value_len;
            }
            None => self.approx_size += key_len + value_len,
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.map.get(key).map(|v| v.as_slice())
    }

    /// Ordered iterator over all entries.
    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &Vec<u8>)> {
        self.map.iter()
    }

    /// Copies out the entries with `start <= key < end`.
    ///
    /// `None` bounds are open. The result is a snapshot: later writes to the
    /// segment are not visible through it.
    pub fn range(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> Vec<(Vec<u8>, Vec<u8>)> {
        let lower = match start {
            Some(s) => Bound::Included(s),
            None => Bound::Unbounded,
        };
        let upper = match end {
            Some(e) => Bound::Excluded(e),
            None => Bound::Unbounded,
        };
        if let (Bound::Included(s), Bound::Excluded(e)) = (lower, upper) {
            // BTreeMap::range panics on an inverted range
            if s >= e {
                return Vec::new();
            }
        }
        self.map
            .range::<[u8], _>((lower, upper))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn approx_size(&self) -> usize {
        self.approx_size
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl Default for MemorySegment {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests;
