//! Storage error types.

use rusqlite::ErrorCode;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by a presence store
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying SQLite call failed
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The database was written by a newer schema than this build knows
    #[error("Unsupported schema version {found}, supported: {supported}")]
    UnsupportedSchema { found: i64, supported: i64 },

    /// A stored row could not be decoded
    #[error("Corrupt {table} row '{key}': {reason}")]
    CorruptRow {
        table: &'static str,
        key: String,
        reason: String,
    },

    /// The database directory could not be created
    #[error("Failed to prepare database directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    /// Faults that may clear on their own: a busy or locked database, or a
    /// disk I/O hiccup. Everything else is permanent for the operation.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::SystemIoFailure
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
pub(crate) fn sqlite_failure(code: std::os::raw::c_int) -> StoreError {
    StoreError::Sqlite(rusqlite::Error::SqliteFailure(
        rusqlite::ffi::Error::new(code),
        None,
    ))
}
