//! One delivery attempt: upload attachments, then insert the record.
//!
//! Shared by the direct submit path and the drainer so both send exactly the
//! same remote record for a given submission.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde_json::Value;

use crate::model::{AttachmentKind, Attachments, FormRecord};
use crate::remote::http::CLIENT_REF_FIELD;
use crate::remote::{AttachmentUpload, RemoteError, RemoteStore};

static RE_UNSAFE_FILE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._-]+").unwrap());

const FALLBACK_FILE_NAME: &str = "file";

/// Everything needed to deliver one submission, borrowed from wherever it
/// currently lives.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Delivery<'a> {
    pub submission_ref: &'a str,
    pub fields: &'a FormRecord,
    pub captured_at: i64,
    pub attachments: &'a Attachments,
}

/// Replaces characters that are unsafe in object paths.
pub(crate) fn sanitize_file_name(name: &str) -> String {
    let cleaned = RE_UNSAFE_FILE_CHARS.replace_all(name.trim(), "_");
    let cleaned = cleaned.trim_matches('_');
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        FALLBACK_FILE_NAME.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Object path of an attachment: `{folder}/{captured_ms}_{ref8}_{file_name}`.
///
/// Derived from the submission itself, so a retried delivery overwrites the
/// same object instead of leaving a second copy behind.
pub(crate) fn object_path(
    kind: AttachmentKind,
    captured_at: i64,
    submission_ref: &str,
    file_name: &str,
) -> String {
    let short_ref: String = submission_ref.chars().take(8).collect();
    format!(
        "{}/{}_{}_{}",
        kind.folder(),
        captured_at,
        short_ref,
        sanitize_file_name(file_name)
    )
}

/// Uploads the attachments and inserts the record built from them.
///
/// Any failure aborts the attempt. Uploads that succeeded before the failure
/// are left on the remote side and are overwritten on the next attempt.
pub(crate) async fn deliver(
    remote: &dyn RemoteStore,
    delivery: Delivery<'_>,
) -> Result<(), RemoteError> {
    let mut record = delivery.fields.clone();

    for kind in AttachmentKind::ALL {
        let locator = match delivery.attachments.get(kind) {
            Some(attachment) => {
                let path = object_path(
                    kind,
                    delivery.captured_at,
                    delivery.submission_ref,
                    &attachment.file_name,
                );
                remote
                    .upload_attachment(AttachmentUpload {
                        kind,
                        object_path: &path,
                        attachment,
                    })
                    .await?
            }
            None => String::new(),
        };
        record.insert(kind.locator_field(), locator);
    }

    record.insert(
        CLIENT_REF_FIELD,
        Value::String(delivery.submission_ref.to_string()),
    );
    remote.insert_registration(&record).await
}

/// [`deliver`] bounded by `limit`. An expired attempt is a transient failure.
pub(crate) async fn deliver_within(
    remote: &dyn RemoteStore,
    delivery: Delivery<'_>,
    limit: Duration,
) -> Result<(), RemoteError> {
    match tokio::time::timeout(limit, deliver(remote, delivery)).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::Timeout(limit)),
    }
}
