//! # Engine - StrataKV storage engine
//!
//! Ties the [`memtable`] and [`segment`] crates into databases of tables,
//! each table an ordered list of segments, and keeps those lists short with
//! a background merge thread.
//!
//! ## Architecture
//!
//! ```text
//! Database ──owns──> Table "a"   [ disk | disk | disk | ... | memory ]
//!    │               Table "b"   [ disk | memory ]
//!    │
//!    └─ scheduler thread (every merge_interval)
//!         │
//!         v
//!       merge_disk_segments()         one table after another
//!         │
//!         v
//!       merge_table_segments()        pick run -> MultiSegment -> new segment
//!         │                           -> drain transactions -> check -> splice
//!         v
//!       write_and_load_segment()      {table}.merged..{seq}.keys.{id}
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module         | Purpose                                                 |
//! |----------------|---------------------------------------------------------|
//! | [`lib.rs`]     | `Database` lifecycle, table registry, sticky error      |
//! | [`table`]      | `Table`, `Transaction`, flush, recovery from manifest   |
//! | [`compaction`] | table merge algorithm and the database sweep            |
//! | [`scheduler`]  | background merge thread                                 |
//! | [`manifest`]   | per-table list of live segment files                    |
//! | [`naming`]     | segment filenames and the merge sequence counter        |
//!
//! ## Failure model
//!
//! Any merge failure is fatal for the whole database: it is recorded once
//! in the database's error slot, the scheduler stops, and table access is
//! refused with [`EngineError::Defunct`] until the database is reopened.

mod compaction;
mod error;
mod logging;
mod manifest;
pub mod naming;
mod scheduler;
mod table;

use anyhow::{Context, Result};
use config::Options;
use crossbeam::sync::WaitGroup;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

pub use compaction::merge_table_segments;
pub use error::{CompactionError, EngineError};
pub use manifest::{Manifest, ManifestEntry};
pub use table::{Table, TableIterator, Transaction};

use logging::LOG_TARGET;

/// Maximum allowed key size in bytes (64 KiB).
pub const MAX_KEY_SIZE: usize = segment::format::MAX_KEY_BYTES;
/// Maximum allowed value size in bytes (10 MiB).
pub const MAX_VALUE_SIZE: usize = segment::format::MAX_VALUE_BYTES;

/// State guarded by the database lock.
pub(crate) struct DbState {
    pub(crate) tables: HashMap<String, Arc<Table>>,
    pub(crate) closing: bool,
    /// Set at most once, by a failed background merge.
    pub(crate) err: Option<Arc<anyhow::Error>>,
    /// In-flight background work; `None` once close has started draining.
    pub(crate) tasks: Option<WaitGroup>,
}

/// A directory of tables plus the background merge thread that keeps them
/// compact.
pub struct Database {
    path: PathBuf,
    options: Options,
    pub(crate) state: Mutex<DbState>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("options", &self.options)
            .field("tables", &state.tables.keys().collect::<Vec<_>>())
            .field("closing", &state.closing)
            .field("err", &state.err.as_ref().map(|e| format!("{:#}", e)))
            .finish()
    }
}

impl Database {
    /// Opens (or creates) the database in directory `path`.
    ///
    /// Every `{table}.manifest` in the directory is loaded as a table. If
    /// `options.background_merge` is set, the merge thread is started.
    ///
    /// # Errors
    ///
    /// Invalid options, an unreadable directory, or a table that fails to
    /// recover.
    pub fn open<P: AsRef<Path>>(path: P, options: Options) -> Result<Arc<Self>> {
        options.validate()?;
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)
            .with_context(|| format!("failed to create database dir {}", path.display()))?;

        let mut tables = HashMap::new();
        for name in Self::discover_tables(&path)? {
            let table = Table::open(&path, &name)?;
            tracing::debug!(target: LOG_TARGET, table = %name, segments = table.segment_count(), "table recovered");
            tables.insert(name, Arc::new(table));
        }

        let db = Arc::new(Self {
            path,
            options,
            state: Mutex::new(DbState {
                tables,
                closing: false,
                err: None,
                tasks: Some(WaitGroup::new()),
            }),
            scheduler: Mutex::new(None),
        });

        if db.options.background_merge {
            let handle = scheduler::spawn(&db)?;
            *db.scheduler.lock() = Some(handle);
        }

        tracing::info!(target: LOG_TARGET, path = %db.path.display(), "database opened");
        Ok(db)
    }

    /// Table names are the stems of `*.manifest` files.
    fn discover_tables(path: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(path)?.flatten() {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else { continue };
            if let Some(table) = name.strip_suffix(".manifest") {
                if valid_table_name(table) {
                    names.push(table.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// The sticky fatal error, if a background merge has failed.
    pub fn err(&self) -> Option<Arc<anyhow::Error>> {
        self.state.lock().err.clone()
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.state.lock().closing
    }

    /// Records `err` unless an error is already recorded.
    pub(crate) fn record_error(&self, err: anyhow::Error) {
        let mut state = self.state.lock();
        if state.err.is_none() {
            state.err = Some(Arc::new(err));
        }
    }

    /// Refuses access once closing or defunct.
    fn check_usable(state: &DbState) -> Result<()> {
        if let Some(err) = &state.err {
            return Err(EngineError::Defunct(format!("{:#}", err)).into());
        }
        if state.closing {
            return Err(EngineError::Closed.into());
        }
        Ok(())
    }

    /// Creates an empty table.
    pub fn create_table(&self, name: &str) -> Result<Arc<Table>> {
        if !valid_table_name(name) {
            return Err(EngineError::InvalidTableName(name.to_string()).into());
        }
        let mut state = self.state.lock();
        Self::check_usable(&state)?;
        if state.tables.contains_key(name) {
            return Err(EngineError::TableExists(name.to_string()).into());
        }
        let table = Arc::new(Table::create(&self.path, name)?);
        state.tables.insert(name.to_string(), Arc::clone(&table));
        tracing::debug!(target: LOG_TARGET, table = name, "table created");
        Ok(table)
    }

    pub fn table(&self, name: &str) -> Result<Arc<Table>> {
        let state = self.state.lock();
        Self::check_usable(&state)?;
        state
            .tables
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::NoSuchTable(name.to_string()).into())
    }

    /// Names of all tables, sorted.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().tables.keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) fn table_snapshot(&self) -> Vec<Arc<Table>> {
        self.state.lock().tables.values().cloned().collect()
    }

    /// Stops background merging and flushes every table.
    ///
    /// Waits for an in-flight merge cycle to finish; a merge is never
    /// interrupted. Calling `close` again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the first flush failure, or an error if the merge thread
    /// panicked.
    pub fn close(&self) -> Result<()> {
        let tasks = {
            let mut state = self.state.lock();
            if state.closing {
                return Ok(());
            }
            state.closing = true;
            state.tasks.take()
        };

        if let Some(tasks) = tasks {
            tasks.wait();
        }

        if let Some(handle) = self.scheduler.lock().take() {
            if handle.thread().id() != std::thread::current().id() {
                handle
                    .join()
                    .map_err(|_| anyhow::anyhow!("merge thread panicked"))?;
            }
        }

        for table in self.table_snapshot() {
            table.flush()?;
        }

        tracing::info!(target: LOG_TARGET, path = %self.path.display(), "database closed");
        Ok(())
    }
}

/// Best-effort shutdown on drop.
///
/// Marks the database closing (the merge thread exits on its next cycle)
/// and flushes every table. Errors are ignored because Drop cannot
/// propagate them.
impl Drop for Database {
    fn drop(&mut self) {
        let was_closing = {
            let mut state = self.state.lock();
            std::mem::replace(&mut state.closing, true)
        };
        if !was_closing {
            for table in self.table_snapshot() {
                let _ = table.flush();
            }
        }
    }
}

/// Table names become filename prefixes, so they must be plain words.
fn valid_table_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests;
