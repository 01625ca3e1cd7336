//! Catalog cache repository: the `catalog_entries` collection.
//!
//! The collection mirrors the remote catalog. It is only written through
//! [`replace_all`], which swaps the whole set and records the sync time in
//! one transaction.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};
use crate::model::CatalogEntry;

fn entry_from_row(row: &Row<'_>) -> Result<CatalogEntry, rusqlite::Error> {
    Ok(CatalogEntry {
        id: row.get("id")?,
        level: row.get("level")?,
        name: row.get("name")?,
        kind: row.get("kind")?,
    })
}

/// Replaces the whole catalog: clear, then insert every entry, atomically.
///
/// If any insert fails the transaction rolls back and the previous cache
/// stays intact. Duplicate ids in `entries` collapse to the last one.
pub fn replace_all(
    db: &Database,
    entries: &[CatalogEntry],
    synced_at: i64,
) -> Result<(), DatabaseError> {
    db.with_tx(|tx| {
        tx.execute("DELETE FROM catalog_entries", [])?;
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO catalog_entries (id, level, name, kind, synced_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for entry in entries {
            stmt.execute(params![entry.id, entry.level, entry.name, entry.kind, synced_at])?;
        }
        tx.execute(
            "INSERT OR REPLACE INTO catalog_sync (id, synced_at) VALUES (1, ?1)",
            params![synced_at],
        )?;
        Ok(())
    })
}

/// Returns all cached entries ordered by level, then name.
pub fn list_all(db: &Database) -> Result<Vec<CatalogEntry>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, level, name, kind FROM catalog_entries ORDER BY level, name, id",
        )?;
        let rows = stmt
            .query_map([], entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Returns cached entries of one level, ordered by name.
pub fn list_by_level(db: &Database, level: &str) -> Result<Vec<CatalogEntry>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, level, name, kind FROM catalog_entries WHERE level = ?1 ORDER BY name, id",
        )?;
        let rows = stmt
            .query_map(params![level], entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Time of the last successful sync (epoch ms), or `None` if there never
/// was one. An empty catalog still counts as synced.
pub fn last_synced_at(db: &Database) -> Result<Option<i64>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row("SELECT synced_at FROM catalog_sync WHERE id = 1", [], |r| r.get(0))
            .optional()?)
    })
}

/// Counts cached entries.
pub fn count(db: &Database) -> Result<u64, DatabaseError> {
    super::count(db, super::Collection::Catalog)
}
