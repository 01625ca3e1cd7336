//! Rejected submission repository: the `rejected_submissions` collection.
//!
//! Holds submissions the remote store refused permanently, so they stop
//! blocking the queue and can be shown to the operator for correction.

use rusqlite::{params, Row};

use super::pending_repo::{self, RawSubmission, PAYLOAD_COLUMNS};
use super::{Database, DatabaseError};
use crate::model::{FormRecord, PendingId, RejectedSubmission};

/// Key holding the stored text of a form record that could not be parsed.
pub const UNREADABLE_FIELDS_KEY: &str = "unreadable_fields";

struct RawRejected {
    id: i64,
    pending_id: i64,
    reason: String,
    rejected_at: i64,
    payload: RawSubmission,
}

impl RawRejected {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let mut payload = RawSubmission::from_row(row)?;
        payload.id = row.get("pending_id")?;
        Ok(Self {
            id: row.get("id")?,
            pending_id: row.get("pending_id")?,
            reason: row.get("reason")?,
            rejected_at: row.get("rejected_at")?,
            payload,
        })
    }

    /// Never fails: a record set aside because it was unreadable still has
    /// to be listed, with its raw text under [`UNREADABLE_FIELDS_KEY`].
    fn decode(self) -> RejectedSubmission {
        debug_assert_eq!(self.payload.id, self.pending_id);
        let parsed = serde_json::from_str::<FormRecord>(&self.payload.fields);
        let submission = match parsed {
            Ok(fields) => self.payload.with_fields(fields),
            Err(_) => {
                let raw = self.payload.fields.clone();
                self.payload
                    .with_fields(FormRecord::new().with(UNREADABLE_FIELDS_KEY, raw))
            }
        };
        RejectedSubmission {
            id: self.id,
            submission,
            reason: self.reason,
            rejected_at: self.rejected_at,
        }
    }
}

/// Moves a pending submission into the rejected collection in one
/// transaction. Returns `false` if no such pending submission exists.
pub fn move_from_pending(
    db: &Database,
    pending_id: PendingId,
    reason: &str,
    rejected_at: i64,
) -> Result<bool, DatabaseError> {
    db.with_tx(|tx| {
        if pending_repo::find_raw(tx, pending_id)?.is_none() {
            return Ok(false);
        }
        tx.execute(
            &format!(
                "INSERT INTO rejected_submissions (pending_id, {cols}, reason, rejected_at)
                 SELECT id, {cols}, ?2, ?3 FROM pending_submissions WHERE id = ?1",
                cols = PAYLOAD_COLUMNS
            ),
            params![pending_id, reason, rejected_at],
        )?;
        tx.execute(
            "DELETE FROM pending_submissions WHERE id = ?1",
            params![pending_id],
        )?;
        Ok(true)
    })
}

/// Returns all rejected submissions, oldest rejection first.
pub fn list_all(db: &Database) -> Result<Vec<RejectedSubmission>, DatabaseError> {
    let raw = db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM rejected_submissions ORDER BY rejected_at ASC, id ASC")?;
        let rows = stmt
            .query_map([], RawRejected::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;
    Ok(raw.into_iter().map(RawRejected::decode).collect())
}

/// Deletes a rejected submission once the operator has dealt with it.
pub fn delete(db: &Database, id: i64) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let removed = conn.execute("DELETE FROM rejected_submissions WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    })
}

/// Counts rejected submissions.
pub fn count(db: &Database) -> Result<u64, DatabaseError> {
    super::count(db, super::Collection::Rejected)
}
