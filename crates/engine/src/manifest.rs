//! # Manifest - per-table segment list
//!
//! Records which disk segment files make up a table, oldest first, so the
//! table can be rebuilt on open. Any segment file of the table that the
//! manifest does not name is garbage and is deleted during recovery.
//!
//! ## File Format
//!
//! One line per disk segment: the keys filename and the data filename,
//! separated by a single space.
//!
//! ```text
//! orders.merged..3.keys.4 orders.merged..3.data.4
//! orders.keys.5 orders.data.5
//! orders.keys.6 orders.data.6
//! ```
//!
//! Lines starting with `#` are comments. Empty lines are ignored.
//!
//! ## Crash Safety
//!
//! The manifest is rewritten atomically: write to a `.tmp` file, fsync, then
//! rename over the existing manifest. Compaction rewrites it after the new
//! merged segment is fully on disk and before the merged-away files are
//! removed, so a crash at any point leaves a manifest whose files all exist.

use anyhow::{bail, Context, Result};
use segment::{tmp_path, Segment};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// The two filenames (basenames, not full paths) of one disk segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub keys: String,
    pub data: String,
}

#[derive(Debug, Clone)]
pub struct Manifest {
    path: PathBuf,
    /// Disk segments, oldest first.
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Loads the manifest at `path`, or returns an empty one if the file
    /// does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        let path = path.to_path_buf();
        if !path.exists() {
            return Ok(Self {
                path,
                entries: Vec::new(),
            });
        }

        let file = File::open(&path)
            .with_context(|| format!("failed to open manifest at {}", path.display()))?;
        let mut entries = Vec::new();

        for (line_num, line) in BufReader::new(file).lines().enumerate() {
            let line =
                line.with_context(|| format!("failed to read manifest line {}", line_num + 1))?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let mut parts = trimmed.split(' ');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(keys), Some(data), None) if !keys.is_empty() && !data.is_empty() => {
                    entries.push(ManifestEntry {
                        keys: keys.to_string(),
                        data: data.to_string(),
                    });
                }
                _ => bail!(
                    "manifest line {}: invalid format (expected '<keys> <data>'): {}",
                    line_num + 1,
                    trimmed
                ),
            }
        }

        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the entries with the disk segments of `segments`, keeping
    /// their order. Other variants are skipped.
    pub fn set_segments(&mut self, segments: &[Segment]) {
        self.entries = segments
            .iter()
            .filter_map(|s| s.as_disk())
            .map(|d| ManifestEntry {
                keys: file_name(d.key_path()),
                data: file_name(d.data_path()),
            })
            .collect();
    }

    /// Returns `true` if `filename` is one of the listed segment files.
    pub fn references(&self, filename: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.keys == filename || e.data == filename)
    }

    /// Persists the manifest (tmp file + fsync + rename).
    pub fn save(&self) -> Result<()> {
        let tmp = tmp_path(&self.path);
        {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)
                .with_context(|| format!("failed to create manifest tmp at {}", tmp.display()))?;

            writeln!(f, "# StrataKV segment manifest")?;
            writeln!(f, "# Format: <keys file> <data file>, oldest first")?;
            for entry in &self.entries {
                writeln!(f, "{} {}", entry.keys, entry.data)?;
            }
            f.flush()?;
            f.sync_all()?;
        }

        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to install manifest at {}", self.path.display()))?;
        Ok(())
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
