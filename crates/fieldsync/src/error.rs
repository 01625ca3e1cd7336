use std::path::PathBuf;
use thiserror::Error;

use crate::db::DatabaseError;
use crate::registration::ValidationError;
use crate::remote::RemoteError;
use crate::secrets::SecretError;

#[derive(Error, Debug)]
pub enum FieldSyncError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Secret error: {0}")]
    Secret(#[from] SecretError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Drain error: {0}")]
    Drain(#[from] DrainError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Invalid registration: {0}")]
    Validation(#[from] ValidationError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("No database path configured and no home directory to default to")]
    NoDatabasePath,
}

/// Errors from [`SubmissionQueue::submit`](crate::queue::SubmissionQueue::submit).
///
/// Network failures never appear here: they resolve to a queued outcome.
#[derive(Error, Debug)]
pub enum QueueError {
    /// The local store could not persist the submission.
    #[error("Failed to queue submission locally: {0}")]
    Storage(#[from] DatabaseError),

    /// The submission task panicked or the runtime shut down under it.
    #[error("Submission task failed: {0}")]
    TaskFailed(String),
}

/// Errors from [`Drainer::drain`](crate::drain::Drainer::drain).
///
/// Delivery failures are reported through the drain report instead.
#[derive(Error, Debug)]
pub enum DrainError {
    #[error("Local store failed during drain: {0}")]
    Storage(#[from] DatabaseError),
}

/// Errors from [`CatalogSynchronizer::refresh`](crate::catalog::CatalogSynchronizer::refresh).
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to fetch catalog: {0}")]
    Remote(#[from] RemoteError),

    #[error("Failed to store catalog: {0}")]
    Storage(#[from] DatabaseError),
}

pub type Result<T> = std::result::Result<T, FieldSyncError>;
