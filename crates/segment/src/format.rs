//! On-disk segment format constants and footer helpers.
//!
//! A disk segment is a pair of files written together:
//!
//! ```text
//! keys file:  repeated [key_len: u32][key][data_offset: u64]
//!             footer   [record_count: u64][magic: u32 = "SGK1"]
//!
//! data file:  repeated [crc32: u32][val_len: u32][value]
//!             footer   [record_count: u64][magic: u32 = "SGD1"]
//! ```
//!
//! All integers are little-endian. The CRC32 in a data record covers
//! `val_len` and the value bytes. `data_offset` points at the CRC prefix.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Result as IoResult, Seek, SeekFrom, Write};

/// Magic number identifying a segment keys file (ASCII "SGK1").
pub const KEYS_MAGIC: u32 = 0x5347_4B31;

/// Magic number identifying a segment data file (ASCII "SGD1").
pub const DATA_MAGIC: u32 = 0x5347_4431;

/// Footer size shared by both files: 8 (`record_count`) + 4 (`magic`).
pub const FOOTER_BYTES: u64 = 8 + 4;

/// Maximum key size we'll allocate during reads (64 KiB).
pub const MAX_KEY_BYTES: usize = 64 * 1024;

/// Maximum value size we'll allocate during reads (10 MiB).
pub const MAX_VALUE_BYTES: usize = 10 * 1024 * 1024;

/// Parsed footer of either segment file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    pub record_count: u64,
    pub magic: u32,
    /// Offset where the footer begins, i.e. the end of the record section.
    pub records_end: u64,
}

pub fn write_footer<W: Write>(w: &mut W, record_count: u64, magic: u32) -> IoResult<()> {
    w.write_u64::<LittleEndian>(record_count)?;
    w.write_u32::<LittleEndian>(magic)?;
    Ok(())
}

/// Reads the footer from the end of `r` and checks it carries `expected`.
///
/// After this call the cursor position is unspecified; callers seek before
/// reading records.
pub fn read_footer<R: Read + Seek>(r: &mut R, expected: u32) -> IoResult<Footer> {
    let filesize = r.seek(SeekFrom::End(0))?;
    if filesize < FOOTER_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "file too small for segment footer",
        ));
    }

    r.seek(SeekFrom::Start(filesize - FOOTER_BYTES))?;
    let record_count = r.read_u64::<LittleEndian>()?;
    let magic = r.read_u32::<LittleEndian>()?;
    if magic != expected {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("bad segment magic: expected {:#x}, got {:#x}", expected, magic),
        ));
    }

    Ok(Footer {
        record_count,
        magic,
        records_end: filesize - FOOTER_BYTES,
    })
}

/// Computes the CRC32 stored in front of a data record.
pub fn value_crc(value: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&(value.len() as u32).to_le_bytes());
    hasher.update(value);
    hasher.finalize()
}
