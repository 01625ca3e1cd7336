//! Database error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the local durable store.
///
/// Every variant is fatal to the operation that raised it. Callers must not
/// retry silently: a dropped pending submission is data loss.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// SQLite error from rusqlite.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error when creating the database directory.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A migration failed to apply.
    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    /// A stored form record could not be encoded or decoded.
    #[error("Corrupt form record for submission {id}: {source}")]
    Record {
        id: i64,
        #[source]
        source: serde_json::Error,
    },

    /// The database lock was poisoned.
    #[error("Database lock poisoned")]
    LockPoisoned,
}
