//! Records carried through the queue and the catalog cache.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Local identifier of a pending submission. Assigned by the store,
/// strictly increasing, never reused.
pub type PendingId = i64;

/// Flat map of form field values as produced by the registration form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormRecord(BTreeMap<String, Value>);

impl FormRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a field, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns a field as a string slice, if present and a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl FromIterator<(String, Value)> for FormRecord {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// The two attachment slots a registration can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    /// Photo of the participant's identity document.
    IdentityDocument,
    /// Photo of the signed contract.
    Contract,
}

impl AttachmentKind {
    pub const ALL: [AttachmentKind; 2] = [AttachmentKind::IdentityDocument, AttachmentKind::Contract];

    /// Folder inside the attachments bucket.
    pub fn folder(&self) -> &'static str {
        match self {
            AttachmentKind::IdentityDocument => "dni",
            AttachmentKind::Contract => "contratos",
        }
    }

    /// Field of the remote record that receives the uploaded locator.
    pub fn locator_field(&self) -> &'static str {
        match self {
            AttachmentKind::IdentityDocument => "foto_dni_url",
            AttachmentKind::Contract => "foto_contrato_url",
        }
    }
}

/// A binary attachment held inline until it is uploaded.
#[derive(Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Attachment {
    /// Creates an attachment, guessing the content type from the file name.
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let content_type = mime_guess::from_path(&file_name)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Self {
            file_name,
            content_type,
            bytes,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }
}

impl std::fmt::Debug for Attachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attachment")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Zero to two attachments of a registration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attachments {
    pub identity_document: Option<Attachment>,
    pub contract: Option<Attachment>,
}

impl Attachments {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_identity_document(mut self, attachment: Attachment) -> Self {
        self.identity_document = Some(attachment);
        self
    }

    pub fn with_contract(mut self, attachment: Attachment) -> Self {
        self.contract = Some(attachment);
        self
    }

    pub fn get(&self, kind: AttachmentKind) -> Option<&Attachment> {
        match kind {
            AttachmentKind::IdentityDocument => self.identity_document.as_ref(),
            AttachmentKind::Contract => self.contract.as_ref(),
        }
    }

    /// Present attachments, identity document first.
    pub fn iter(&self) -> impl Iterator<Item = (AttachmentKind, &Attachment)> {
        AttachmentKind::ALL
            .into_iter()
            .filter_map(move |kind| self.get(kind).map(|a| (kind, a)))
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.identity_document.is_none() && self.contract.is_none()
    }
}

/// A registration captured locally because it could not reach the remote
/// store. Immutable once stored.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSubmission {
    pub id: PendingId,
    /// Idempotency key sent to the remote store as `client_ref`.
    pub submission_ref: String,
    pub fields: FormRecord,
    /// Capture time, epoch milliseconds on the client clock.
    pub captured_at: i64,
    pub attachments: Attachments,
}

/// A submission the remote store refused permanently.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedSubmission {
    pub id: i64,
    /// The submission as it was queued; `submission.id` is the old pending id.
    pub submission: PendingSubmission,
    pub reason: String,
    /// Epoch milliseconds.
    pub rejected_at: i64,
}

/// Cached copy of one remote catalog row (a course or program).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: i64,
    #[serde(rename = "nivel")]
    pub level: String,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "tipo", default)]
    pub kind: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachment_guesses_content_type() {
        let a = Attachment::new("dni.jpg", vec![1, 2, 3]);
        assert_eq!(a.content_type, "image/jpeg");

        let b = Attachment::new("blob", vec![]);
        assert_eq!(b.content_type, "application/octet-stream");
    }

    #[test]
    fn test_attachments_iter_order() {
        let attachments = Attachments::none()
            .with_contract(Attachment::new("c.png", vec![2]))
            .with_identity_document(Attachment::new("d.png", vec![1]));

        let kinds: Vec<_> = attachments.iter().map(|(k, _)| k).collect();
        assert_eq!(
            kinds,
            vec![AttachmentKind::IdentityDocument, AttachmentKind::Contract]
        );
        assert_eq!(attachments.len(), 2);
        assert!(Attachments::none().is_empty());
    }

    #[test]
    fn test_catalog_entry_remote_field_names() {
        let json = r#"{"id": 7, "nivel": "Inicial", "nombre": "Psicomotricidad", "tipo": "Diplomado", "extra": 1}"#;
        let entry: CatalogEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.level, "Inicial");
        assert_eq!(entry.name, "Psicomotricidad");
        assert_eq!(entry.kind.as_deref(), Some("Diplomado"));

        let without_kind: CatalogEntry =
            serde_json::from_str(r#"{"id": 8, "nivel": "Primaria", "nombre": "Lectura"}"#).unwrap();
        assert!(without_kind.kind.is_none());
    }

    #[test]
    fn test_form_record_is_flat_json_object() {
        let record = FormRecord::new().with("dni", "12345678").with("num_cuotas", 3);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["dni"], "12345678");
        assert_eq!(json["num_cuotas"], 3);
        assert_eq!(record.get_str("dni"), Some("12345678"));
    }
}
