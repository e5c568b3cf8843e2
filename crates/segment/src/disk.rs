use anyhow::{bail, Context, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::format::{
    read_footer, value_crc, DATA_MAGIC, KEYS_MAGIC, MAX_KEY_BYTES, MAX_VALUE_BYTES,
};

/// Extracts the segment id from a segment filename.
///
/// The id is always the last dot-separated component, for both flushed
/// (`orders.keys.12`) and merged (`orders.merged..3.keys.12`) names.
pub fn segment_id_from_path(path: &Path) -> Result<u64> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow::anyhow!("segment path has no filename: {}", path.display()))?;
    let suffix = name.rsplit('.').next().unwrap_or(name);
    suffix
        .parse::<u64>()
        .with_context(|| format!("segment filename has no numeric id: {}", name))
}

/// An immutable on-disk segment backed by a keys file and a data file.
///
/// On [`open`](DiskSegment::open) the keys file is read fully into an
/// in-memory index (key -> data offset). Values are read on demand through
/// the data file handle.
///
/// Both handles are owned by the segment and are closed exactly once, by
/// compaction, via [`close_key_file`](DiskSegment::close_key_file) and
/// [`close_data_file`](DiskSegment::close_data_file). After that every read
/// fails.
pub struct DiskSegment {
    id: u64,
    key_path: PathBuf,
    data_path: PathBuf,
    index: BTreeMap<Vec<u8>, u64>,
    /// Held open for the segment's lifetime so the file stays pinned.
    key_file: Mutex<Option<File>>,
    data_file: Mutex<Option<BufReader<File>>>,
}

impl std::fmt::Debug for DiskSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskSegment")
            .field("id", &self.id)
            .field("key_path", &self.key_path)
            .field("entries", &self.index.len())
            .finish()
    }
}

impl DiskSegment {
    /// Opens a segment from its two files and loads the key index.
    ///
    /// # Errors
    ///
    /// Fails if either filename lacks a numeric id, a footer is missing or
    /// has the wrong magic, keys are not strictly ascending, the two record
    /// counts disagree, or any I/O fails.
    pub fn open<P1: AsRef<Path>, P2: AsRef<Path>>(key_path: P1, data_path: P2) -> Result<Self> {
        let key_path = key_path.as_ref().to_path_buf();
        let data_path = data_path.as_ref().to_path_buf();
        let id = segment_id_from_path(&key_path)?;

        let mut kf = File::open(&key_path)
            .with_context(|| format!("failed to open keys file {}", key_path.display()))?;
        let key_footer = read_footer(&mut kf, KEYS_MAGIC)
            .with_context(|| format!("invalid keys file {}", key_path.display()))?;

        let mut df = File::open(&data_path)
            .with_context(|| format!("failed to open data file {}", data_path.display()))?;
        let data_footer = read_footer(&mut df, DATA_MAGIC)
            .with_context(|| format!("invalid data file {}", data_path.display()))?;

        if key_footer.record_count != data_footer.record_count {
            bail!(
                "segment {}: keys file has {} records but data file has {}",
                id,
                key_footer.record_count,
                data_footer.record_count
            );
        }

        kf.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(kf);
        let mut index = BTreeMap::new();
        let mut last: Option<Vec<u8>> = None;
        let mut pos = 0u64;

        while pos < key_footer.records_end {
            let key_len = reader.read_u32::<LittleEndian>()? as usize;
            if key_len > MAX_KEY_BYTES {
                bail!("corrupt keys file: key_len {} exceeds maximum {}", key_len, MAX_KEY_BYTES);
            }
            let mut key = vec![0u8; key_len];
            reader.read_exact(&mut key)?;
            let data_offset = reader.read_u64::<LittleEndian>()?;
            if data_offset >= data_footer.records_end {
                bail!("corrupt keys file: data offset {} out of range", data_offset);
            }
            if let Some(prev) = &last {
                if prev.as_slice() >= key.as_slice() {
                    bail!("corrupt keys file {}: keys out of order", key_path.display());
                }
            }
            pos += 4 + key_len as u64 + 8;
            last = Some(key.clone());
            index.insert(key, data_offset);
        }

        if index.len() as u64 != key_footer.record_count {
            bail!(
                "segment {}: footer claims {} records, found {}",
                id,
                key_footer.record_count,
                index.len()
            );
        }

        Ok(Self {
            id,
            key_path,
            data_path,
            index,
            key_file: Mutex::new(Some(reader.into_inner())),
            data_file: Mutex::new(Some(BufReader::new(df))),
        })
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Returns `true` once either file handle has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.key_file.lock().is_none() || self.data_file.lock().is_none()
    }

    /// Point lookup for a single key.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.index.get(key) {
            Some(&offset) => self.read_value(offset).map(Some),
            None => Ok(None),
        }
    }

    /// Opens an iterator over `start <= key < end` (`None` = unbounded).
    ///
    /// The matching keys and offsets are copied out of the index up front;
    /// values are read lazily as the iterator advances.
    pub fn lookup(
        self: &Arc<Self>,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<DiskSegmentIterator> {
        if self.is_closed() {
            bail!("segment {} is closed", self.id);
        }
        let lower = start.map_or(Bound::Unbounded, Bound::Included);
        let upper = end.map_or(Bound::Unbounded, Bound::Excluded);
        let entries: Vec<(Vec<u8>, u64)> = match (start, end) {
            (Some(s), Some(e)) if s >= e => Vec::new(),
            _ => self
                .index
                .range::<[u8], _>((lower, upper))
                .map(|(k, &off)| (k.clone(), off))
                .collect(),
        };
        Ok(DiskSegmentIterator {
            segment: Arc::clone(self),
            entries: entries.into_iter(),
        })
    }

    /// Reads and verifies the value record at `offset`.
    fn read_value(&self, offset: u64) -> Result<Vec<u8>> {
        let mut guard = self.data_file.lock();
        let f = match guard.as_mut() {
            Some(f) => f,
            None => bail!("segment {} is closed", self.id),
        };
        f.seek(SeekFrom::Start(offset))?;
        let stored_crc = f.read_u32::<LittleEndian>()?;
        let val_len = f.read_u32::<LittleEndian>()? as usize;
        if val_len > MAX_VALUE_BYTES {
            bail!("corrupt data: val_len {} exceeds maximum {}", val_len, MAX_VALUE_BYTES);
        }
        let mut value = vec![0u8; val_len];
        f.read_exact(&mut value)?;

        let actual_crc = value_crc(&value);
        if actual_crc != stored_crc {
            bail!(
                "CRC32 mismatch in segment {} at offset {}: expected {:#010x}, got {:#010x}",
                self.id,
                offset,
                stored_crc,
                actual_crc
            );
        }
        Ok(value)
    }

    /// Closes the keys file handle. Fails if it was already closed.
    pub fn close_key_file(&self) -> Result<()> {
        match self.key_file.lock().take() {
            Some(f) => {
                drop(f);
                Ok(())
            }
            None => bail!("keys file of segment {} already closed", self.id),
        }
    }

    /// Closes the data file handle. Fails if it was already closed.
    pub fn close_data_file(&self) -> Result<()> {
        match self.data_file.lock().take() {
            Some(f) => {
                drop(f);
                Ok(())
            }
            None => bail!("data file of segment {} already closed", self.id),
        }
    }
}

/// Range iterator over one [`DiskSegment`].
pub struct DiskSegmentIterator {
    segment: Arc<DiskSegment>,
    entries: std::vec::IntoIter<(Vec<u8>, u64)>,
}

impl DiskSegmentIterator {
    pub fn next_entry(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        match self.entries.next() {
            Some((key, offset)) => {
                let value = self.segment.read_value(offset)?;
                Ok(Some((key, value)))
            }
            None => Ok(None),
        }
    }
}
