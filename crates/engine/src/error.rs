//! Typed errors that callers may want to match on.
//!
//! Everything else travels as `anyhow::Error`; these are wrapped inside it
//! and can be recovered with `downcast_ref`.

use thiserror::Error;

/// Failures of a single table merge pass that are fatal for the database.
#[derive(Debug, Error)]
pub enum CompactionError {
    /// The segment list no longer holds the selected run at the selected
    /// offsets: another actor changed it while the merge was running.
    #[error("table {table}: unexpected segment change at position {position}")]
    SegmentChanged { table: String, position: usize },

    /// Closing or removing the files of a merged-away segment failed.
    #[error("table {table}: failed to release segment {segment}: {}", join_errors(.errors))]
    Cleanup {
        table: String,
        segment: u64,
        errors: Vec<anyhow::Error>,
    },
}

fn join_errors(errors: &[anyhow::Error]) -> String {
    errors
        .iter()
        .map(|e| format!("{:#}", e))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Database and table level refusals.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("database is closed")]
    Closed,

    /// A background merge failed; the database must be reopened.
    #[error("database is defunct: {0}")]
    Defunct(String),

    #[error("table already exists: {0}")]
    TableExists(String),

    #[error("no such table: {0}")]
    NoSuchTable(String),

    #[error("invalid table name: {0:?}")]
    InvalidTableName(String),
}
