use anyhow::{bail, Result};
use byteorder::{LittleEndian, WriteBytesExt};
use memtable::MemorySegment;
use std::fs::{rename, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::format::{value_crc, write_footer, DATA_MAGIC, KEYS_MAGIC, MAX_KEY_BYTES, MAX_VALUE_BYTES};
use crate::logging::LOG_TARGET;
use crate::{DiskSegment, SegmentIterator};

/// Returns `path` with `.tmp` appended to its filename.
///
/// Segment names end in a numeric id, so `Path::with_extension` would
/// replace the id instead of extending the name.
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Persists everything `iter` yields as a new disk segment and opens it.
///
/// This is the write half of compaction: the merge iterator is drained
/// straight into the two files without materialising the data set.
///
/// # Errors
///
/// Propagates the first iterator error, rejects out-of-order or empty
/// input, and fails on any I/O error. Temporary files are removed on
/// failure.
pub fn write_and_load_segment(
    key_path: &Path,
    data_path: &Path,
    iter: &mut SegmentIterator,
) -> Result<DiskSegment> {
    write_internal(key_path, data_path, iter.by_ref())?;
    DiskSegment::open(key_path, data_path)
}

/// Freezes a memory segment into a new disk segment and opens it.
pub fn write_memory_segment(
    key_path: &Path,
    data_path: &Path,
    mem: &MemorySegment,
) -> Result<DiskSegment> {
    if mem.is_empty() {
        bail!("refusing to write an empty segment (empty memory segment)");
    }
    let entries = mem.iter().map(|(k, v)| Ok((k.clone(), v.clone())));
    write_internal(key_path, data_path, entries)?;
    DiskSegment::open(key_path, data_path)
}

fn write_internal<I>(key_path: &Path, data_path: &Path, iter: I) -> Result<()>
where
    I: Iterator<Item = Result<(Vec<u8>, Vec<u8>)>>,
{
    let key_tmp = tmp_path(key_path);
    let data_tmp = tmp_path(data_path);

    let result = write_files(&key_tmp, &data_tmp, iter);
    if result.is_err() {
        let _ = std::fs::remove_file(&key_tmp);
        let _ = std::fs::remove_file(&data_tmp);
        return result;
    }

    // Data first: a keys file never points at a data file that isn't there.
    rename(&data_tmp, data_path)?;
    rename(&key_tmp, key_path)?;

    // Fsync the parent directory so both renames are durable.
    if let Some(parent) = key_path.parent() {
        if let Ok(dir) = std::fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }

    tracing::debug!(
        target: LOG_TARGET,
        keys = %key_path.display(),
        data = %data_path.display(),
        "segment written"
    );
    Ok(())
}

fn write_files<I>(key_tmp: &Path, data_tmp: &Path, iter: I) -> Result<()>
where
    I: Iterator<Item = Result<(Vec<u8>, Vec<u8>)>>,
{
    let open = |p: &Path| {
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(p)
    };
    let mut keys = BufWriter::new(open(key_tmp)?);
    let mut data = BufWriter::new(open(data_tmp)?);

    let mut data_offset = 0u64;
    let mut count = 0u64;
    let mut last_key: Option<Vec<u8>> = None;

    for entry in iter {
        let (key, value) = entry?;
        if key.len() > MAX_KEY_BYTES {
            bail!("key too large: {} bytes (max {})", key.len(), MAX_KEY_BYTES);
        }
        if value.len() > MAX_VALUE_BYTES {
            bail!("value too large: {} bytes (max {})", value.len(), MAX_VALUE_BYTES);
        }
        if let Some(prev) = &last_key {
            if prev.as_slice() >= key.as_slice() {
                bail!("segment input is not strictly ascending");
            }
        }

        // DATA: [crc32][val_len][value]
        data.write_u32::<LittleEndian>(value_crc(&value))?;
        data.write_u32::<LittleEndian>(value.len() as u32)?;
        data.write_all(&value)?;

        // KEYS: [key_len][key][data_offset]
        keys.write_u32::<LittleEndian>(key.len() as u32)?;
        keys.write_all(&key)?;
        keys.write_u64::<LittleEndian>(data_offset)?;

        data_offset += 4 + 4 + value.len() as u64;
        count += 1;
        last_key = Some(key);
    }

    if count == 0 {
        bail!("refusing to write an empty segment (no entries)");
    }

    write_footer(&mut data, count, DATA_MAGIC)?;
    write_footer(&mut keys, count, KEYS_MAGIC)?;

    data.flush()?;
    data.into_inner()?.sync_all()?;
    keys.flush()?;
    keys.into_inner()?.sync_all()?;
    Ok(())
}
