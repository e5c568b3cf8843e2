
use crate::*;
use memtable::MemorySegment;
use std::path::{Path, PathBuf};

/// Builds a memory segment from `(key, value)` string pairs.
pub(crate) fn mem_segment(entries: &[(&str, &str)]) -> MemorySegment {
    let mut m = MemorySegment::new();
    for (k, v) in entries {
        m.put(k.as_bytes().to_vec(), v.as_bytes().to_vec());
    }
    m
}

/// Returns the `(keys, data)` paths for segment `id` of table `t` in `dir`.
pub(crate) fn paths(dir: &Path, id: u64) -> (PathBuf, PathBuf) {
    (
        dir.join(format!("t.keys.{}", id)),
        dir.join(format!("t.data.{}", id)),
    )
}

/// Writes `entries` as disk segment `id` and returns it wrapped.
pub(crate) fn disk_segment(dir: &Path, id: u64, entries: &[(&str, &str)]) -> anyhow::Result<Segment> {
    let (k, d) = paths(dir, id);
    let seg = write_memory_segment(&k, &d, &mem_segment(entries))?;
    Ok(Segment::disk(seg))
}

pub(crate) fn strings(pairs: Vec<(Vec<u8>, Vec<u8>)>) -> Vec<(String, String)> {
    pairs
        .into_iter()
        .map(|(k, v)| {
            (
                String::from_utf8(k).unwrap(),
                String::from_utf8(v).unwrap(),
            )
        })
        .collect()
}
