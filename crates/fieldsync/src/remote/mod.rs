//! Remote store boundary.
//!
//! The remote side is a relational store (registrations, catalog) plus a
//! binary store for attachments. [`RemoteStore`] is the seam the queue, the
//! drainer and the catalog synchronizer talk to; [`HttpRemoteStore`] is the
//! production client and [`InMemoryRemote`] a deterministic double.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{Attachment, AttachmentKind, CatalogEntry, FormRecord};

pub mod http;
pub mod memory;

pub use http::HttpRemoteStore;
pub use memory::InMemoryRemote;

/// Maximum length for response bodies kept in error messages.
const MAX_ERROR_BODY_LENGTH: usize = 200;

/// Errors returned by the remote store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Connection refused, DNS failure, dropped connection.
    #[error("Remote store unreachable: {0}")]
    Transport(String),

    #[error("Remote call timed out after {0:?}")]
    Timeout(Duration),

    /// 5xx, 408 or 429.
    #[error("Remote store unavailable ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Remote store refused credentials ({status})")]
    Unauthorized { status: u16 },

    /// The record itself is unacceptable. Replaying it will not help.
    #[error("Remote store rejected the record ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Unexpected remote response: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    /// Maps a non-success HTTP status and its body to an error.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = truncate_body(body);
        match status {
            401 | 403 => RemoteError::Unauthorized { status },
            408 | 429 => RemoteError::Server { status, message },
            400..=499 => RemoteError::Rejected { status, message },
            500..=599 => RemoteError::Server { status, message },
            _ => RemoteError::InvalidResponse(format!("status {}: {}", status, message)),
        }
    }

    /// True if the remote refused the record itself and retrying cannot succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(self, RemoteError::Rejected { .. })
    }

    /// True if the failure is likely transient and the item should stay queued.
    pub fn is_retryable(&self) -> bool {
        !self.is_permanent()
    }
}

fn truncate_body(body: &str) -> String {
    let body = body.trim();
    if body.len() > MAX_ERROR_BODY_LENGTH {
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated)", &body[..end])
    } else {
        body.to_string()
    }
}

/// One attachment upload request.
#[derive(Debug, Clone, Copy)]
pub struct AttachmentUpload<'a> {
    pub kind: AttachmentKind,
    /// Object path inside the attachments bucket, e.g. `dni/1700000000000_ab12cd34_dni.jpg`.
    pub object_path: &'a str,
    pub attachment: &'a Attachment,
}

/// Operations the offline queue needs from the remote side.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Uploads an attachment and returns its stable public locator.
    async fn upload_attachment(&self, upload: AttachmentUpload<'_>) -> Result<String, RemoteError>;

    /// Inserts one registration record. Must be idempotent on `client_ref`.
    async fn insert_registration(&self, record: &FormRecord) -> Result<(), RemoteError>;

    /// Reads the full reference catalog.
    async fn fetch_catalog(&self) -> Result<Vec<CatalogEntry>, RemoteError>;
}
