//! Local durable store.
//!
//! Uses rusqlite (SQLite) with a thread-safe `Database` handle.
//! All access is serialized through a `Mutex<Connection>`. The store holds
//! three independent collections: pending submissions, the catalog cache and
//! rejected submissions.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::{Connection, Transaction};

pub mod catalog_repo;
pub mod error;
pub mod migrations;
pub mod pending_repo;
pub mod rejected_repo;

pub use error::DatabaseError;

/// The collections kept in the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    /// Registrations waiting to be delivered.
    Pending,
    /// Mirror of the remote catalog.
    Catalog,
    /// Registrations the remote store refused permanently.
    Rejected,
}

impl Collection {
    fn table(&self) -> &'static str {
        match self {
            Collection::Pending => "pending_submissions",
            Collection::Catalog => "catalog_entries",
            Collection::Rejected => "rejected_submissions",
        }
    }
}

/// Thread-safe database handle wrapping a single rusqlite connection.
///
/// Cloning is cheap (inner `Arc`). WAL mode is enabled for file databases so
/// a crash never leaves a half-written page behind.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens (or creates) the database at the given path and runs all
    /// pending migrations.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL; PRAGMA foreign_keys=ON;",
        )?;

        migrations::run_all(&mut conn)?;

        log::info!("Local store opened at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory database for testing. Runs all migrations.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let mut conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        migrations::run_all(&mut conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Provides locked access to the underlying connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }

    /// Runs `f` inside a transaction. Commits if `f` returns `Ok`, rolls
    /// back otherwise.
    pub fn with_tx<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, DatabaseError>,
    {
        let mut conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

/// Counts the records of a collection.
pub fn count(db: &Database, collection: Collection) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", collection.table()),
            [],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Returns the canonical database path: `~/.fieldsync/data/fieldsync.db`.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".fieldsync").join("data").join("fieldsync.db"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let count: u32 =
                conn.query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))?;
            assert_eq!(count, migrations::latest_version());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_open_file_db_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.db");
        let db = Database::open(&path).unwrap();
        assert_eq!(count(&db, Collection::Pending).unwrap(), 0);
        assert!(path.exists());
    }

    #[test]
    fn test_default_database_path() {
        let path = default_database_path().unwrap();
        assert!(path.ends_with("fieldsync.db"));
        assert!(path.to_string_lossy().contains(".fieldsync"));
    }

    #[test]
    fn test_with_tx_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();
        let result: Result<(), DatabaseError> = db.with_tx(|tx| {
            tx.execute(
                "INSERT INTO catalog_entries (id, level, name) VALUES (1, 'Inicial', 'A')",
                [],
            )?;
            Err(DatabaseError::LockPoisoned)
        });
        assert!(result.is_err());
        assert_eq!(count(&db, Collection::Catalog).unwrap(), 0);
    }

    #[test]
    fn test_database_is_clone() {
        let db = Database::open_in_memory().unwrap();
        let db2 = db.clone();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO catalog_entries (id, level, name) VALUES (1, 'Inicial', 'A')",
                [],
            )?;
            Ok(())
        })
        .unwrap();
        assert_eq!(count(&db2, Collection::Catalog).unwrap(), 1);
    }
}
