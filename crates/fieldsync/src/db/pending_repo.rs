//! Pending submission repository: the `pending_submissions` collection.
//!
//! Rows are only ever inserted and deleted. There is no update path.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DatabaseError};
use crate::model::{Attachment, Attachments, FormRecord, PendingId, PendingSubmission};

/// A submission about to be queued. The store assigns the id.
#[derive(Debug, Clone)]
pub struct NewPendingSubmission {
    pub submission_ref: String,
    pub fields: FormRecord,
    pub captured_at: i64,
    pub attachments: Attachments,
}

/// Column list shared with the rejected collection, which stores the same payload.
pub(crate) const PAYLOAD_COLUMNS: &str = "submission_ref, fields, captured_at,
     id_document_name, id_document_type, id_document_data,
     contract_name, contract_type, contract_data";

/// A row as read from SQLite, before the form record is decoded.
pub(crate) struct RawSubmission {
    pub id: i64,
    pub submission_ref: String,
    pub fields: String,
    pub captured_at: i64,
    pub id_document: (Option<String>, Option<String>, Option<Vec<u8>>),
    pub contract: (Option<String>, Option<String>, Option<Vec<u8>>),
}

impl RawSubmission {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            submission_ref: row.get("submission_ref")?,
            fields: row.get("fields")?,
            captured_at: row.get("captured_at")?,
            id_document: (
                row.get("id_document_name")?,
                row.get("id_document_type")?,
                row.get("id_document_data")?,
            ),
            contract: (
                row.get("contract_name")?,
                row.get("contract_type")?,
                row.get("contract_data")?,
            ),
        })
    }

    pub(crate) fn decode(self) -> Result<PendingSubmission, DatabaseError> {
        let fields: FormRecord =
            serde_json::from_str(&self.fields).map_err(|e| DatabaseError::Record {
                id: self.id,
                source: e,
            })?;

        Ok(self.with_fields(fields))
    }

    pub(crate) fn with_fields(self, fields: FormRecord) -> PendingSubmission {
        PendingSubmission {
            id: self.id,
            submission_ref: self.submission_ref,
            fields,
            captured_at: self.captured_at,
            attachments: Attachments {
                identity_document: attachment_from_columns(self.id_document),
                contract: attachment_from_columns(self.contract),
            },
        }
    }
}

fn attachment_from_columns(
    (name, content_type, data): (Option<String>, Option<String>, Option<Vec<u8>>),
) -> Option<Attachment> {
    let bytes = data?;
    let attachment = Attachment::new(name.unwrap_or_default(), bytes);
    Some(match content_type {
        Some(ct) => attachment.with_content_type(ct),
        None => attachment,
    })
}

fn attachment_columns(
    attachment: Option<&Attachment>,
) -> (Option<&str>, Option<&str>, Option<&[u8]>) {
    match attachment {
        Some(a) => (
            Some(a.file_name.as_str()),
            Some(a.content_type.as_str()),
            Some(a.bytes.as_slice()),
        ),
        None => (None, None, None),
    }
}

/// Inserts a pending submission and returns its assigned id.
///
/// A failure here is data loss if ignored, so it always propagates.
pub fn insert(db: &Database, submission: &NewPendingSubmission) -> Result<PendingId, DatabaseError> {
    let fields = serde_json::to_string(&submission.fields).map_err(|e| DatabaseError::Record {
        id: 0,
        source: e,
    })?;
    let (doc_name, doc_type, doc_data) =
        attachment_columns(submission.attachments.identity_document.as_ref());
    let (contract_name, contract_type, contract_data) =
        attachment_columns(submission.attachments.contract.as_ref());

    db.with_conn(|conn| {
        conn.execute(
            &format!(
                "INSERT INTO pending_submissions ({})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                PAYLOAD_COLUMNS
            ),
            params![
                submission.submission_ref,
                fields,
                submission.captured_at,
                doc_name,
                doc_type,
                doc_data,
                contract_name,
                contract_type,
                contract_data,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Returns every pending submission, oldest capture first. Ties on the
/// capture timestamp fall back to insertion order.
pub fn list_in_capture_order(db: &Database) -> Result<Vec<PendingSubmission>, DatabaseError> {
    let raw = db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM pending_submissions ORDER BY captured_at ASC, id ASC",
        )?;
        let rows = stmt
            .query_map([], RawSubmission::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;
    raw.into_iter().map(RawSubmission::decode).collect()
}

/// Returns the oldest pending submission, if any.
pub fn find_oldest(db: &Database) -> Result<Option<PendingSubmission>, DatabaseError> {
    let raw = db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM pending_submissions ORDER BY captured_at ASC, id ASC LIMIT 1",
                [],
                RawSubmission::from_row,
            )
            .optional()?)
    })?;
    raw.map(RawSubmission::decode).transpose()
}

/// Finds a pending submission by id.
pub fn find_by_id(db: &Database, id: PendingId) -> Result<Option<PendingSubmission>, DatabaseError> {
    let raw = db.with_conn(|conn| find_raw(conn, id))?;
    raw.map(RawSubmission::decode).transpose()
}

pub(crate) fn find_raw(
    conn: &Connection,
    id: PendingId,
) -> Result<Option<RawSubmission>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT * FROM pending_submissions WHERE id = ?1",
            params![id],
            RawSubmission::from_row,
        )
        .optional()?)
}

/// Deletes exactly one pending submission. Returns whether a row was removed.
pub fn delete(db: &Database, id: PendingId) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let removed = conn.execute("DELETE FROM pending_submissions WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    })
}

/// Counts pending submissions.
pub fn count(db: &Database) -> Result<u64, DatabaseError> {
    super::count(db, super::Collection::Pending)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AttachmentKind;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn sample(reference: &str, dni: &str, captured_at: i64) -> NewPendingSubmission {
        NewPendingSubmission {
            submission_ref: reference.to_string(),
            fields: FormRecord::new().with("dni", dni).with("nombres", "Ana"),
            captured_at,
            attachments: Attachments::none(),
        }
    }

    #[test]
    fn test_insert_and_find() {
        let db = test_db();
        let id = insert(&db, &sample("r1", "12345678", 1_000)).unwrap();

        let found = find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(found.submission_ref, "r1");
        assert_eq!(found.fields.get_str("dni"), Some("12345678"));
        assert_eq!(found.captured_at, 1_000);
        assert!(found.attachments.is_empty());
    }

    #[test]
    fn test_attachments_are_stored_inline() {
        let db = test_db();
        let mut submission = sample("r1", "12345678", 1_000);
        submission.attachments = Attachments::none()
            .with_identity_document(Attachment::new("dni.jpg", vec![0xFF, 0xD8, 0xFF]))
            .with_contract(Attachment::new("contrato.png", vec![0x89, 0x50]));
        let id = insert(&db, &submission).unwrap();

        let found = find_by_id(&db, id).unwrap().unwrap();
        let doc = found.attachments.get(AttachmentKind::IdentityDocument).unwrap();
        assert_eq!(doc.file_name, "dni.jpg");
        assert_eq!(doc.content_type, "image/jpeg");
        assert_eq!(doc.bytes, vec![0xFF, 0xD8, 0xFF]);
        let contract = found.attachments.get(AttachmentKind::Contract).unwrap();
        assert_eq!(contract.bytes, vec![0x89, 0x50]);
    }

    #[test]
    fn test_ids_are_sequential_and_never_reused() {
        let db = test_db();
        let a = insert(&db, &sample("a", "11111111", 1)).unwrap();
        let b = insert(&db, &sample("b", "22222222", 2)).unwrap();
        assert!(b > a);

        assert!(delete(&db, b).unwrap());
        let c = insert(&db, &sample("c", "33333333", 3)).unwrap();
        assert!(c > b);
    }

    #[test]
    fn test_list_in_capture_order() {
        let db = test_db();
        insert(&db, &sample("late", "1", 3_000)).unwrap();
        insert(&db, &sample("early", "2", 1_000)).unwrap();
        insert(&db, &sample("tie-first", "3", 2_000)).unwrap();
        insert(&db, &sample("tie-second", "4", 2_000)).unwrap();

        let refs: Vec<_> = list_in_capture_order(&db)
            .unwrap()
            .into_iter()
            .map(|p| p.submission_ref)
            .collect();
        assert_eq!(refs, vec!["early", "tie-first", "tie-second", "late"]);
        assert_eq!(find_oldest(&db).unwrap().unwrap().submission_ref, "early");
    }

    #[test]
    fn test_delete_and_count() {
        let db = test_db();
        let a = insert(&db, &sample("a", "1", 1)).unwrap();
        insert(&db, &sample("b", "2", 2)).unwrap();
        assert_eq!(count(&db).unwrap(), 2);

        assert!(delete(&db, a).unwrap());
        assert!(!delete(&db, a).unwrap());
        assert_eq!(count(&db).unwrap(), 1);
    }

    #[test]
    fn test_duplicate_reference_fails_loudly() {
        let db = test_db();
        insert(&db, &sample("same", "1", 1)).unwrap();
        let err = insert(&db, &sample("same", "2", 2)).unwrap_err();
        assert!(matches!(err, DatabaseError::Sqlite(_)));
        assert_eq!(count(&db).unwrap(), 1);
    }

    #[test]
    fn test_find_oldest_empty() {
        let db = test_db();
        assert!(find_oldest(&db).unwrap().is_none());
        assert!(list_in_capture_order(&db).unwrap().is_empty());
    }
}
