//! Database migration system.
//!
//! Tracks applied migrations in a `_migrations` table and applies pending
//! ones in order. Migrations only ever add tables or columns so an upgrade
//! never destroys queued submissions. ADD COLUMN steps are conditional to
//! keep re-runs idempotent.

use rusqlite::Connection;

use super::error::DatabaseError;

/// A single migration definition.
struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
    kind: MigrationKind,
}

enum MigrationKind {
    /// Execute the SQL directly.
    Standard,
    /// ALTER TABLE ADD COLUMN, skipped if the column already exists.
    AddColumn {
        table: &'static str,
        column: &'static str,
    },
}

/// All migrations in order. Each is applied at most once.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_pending_submissions",
        sql: include_str!("sql/001_create_pending_submissions.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 2,
        description: "create_catalog_entries",
        sql: include_str!("sql/002_create_catalog_entries.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 3,
        description: "create_rejected_submissions",
        sql: include_str!("sql/003_create_rejected_submissions.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 4,
        description: "add_synced_at_to_catalog",
        sql: include_str!("sql/004_add_synced_at_to_catalog.sql"),
        kind: MigrationKind::AddColumn {
            table: "catalog_entries",
            column: "synced_at",
        },
    },
    Migration {
        version: 5,
        description: "create_catalog_sync",
        sql: include_str!("sql/005_create_catalog_sync.sql"),
        kind: MigrationKind::Standard,
    },
];

/// Returns the highest schema version this build knows about.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

/// Runs all pending migrations on the given connection.
///
/// Each migration and its bookkeeping row commit in one transaction, so a
/// crash mid-upgrade leaves the schema at the previous version.
pub fn run_all(conn: &mut Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        log::info!(
            "Running migration v{}: {}",
            migration.version,
            migration.description
        );

        let tx = conn.transaction()?;

        let should_run = match &migration.kind {
            MigrationKind::Standard => true,
            MigrationKind::AddColumn { table, column } => !column_exists(&tx, table, column)?,
        };

        if should_run {
            tx.execute_batch(migration.sql)
                .map_err(|e| DatabaseError::Migration {
                    version: migration.version,
                    reason: e.to_string(),
                })?;
        } else {
            log::info!(
                "Skipping migration v{} (condition not met)",
                migration.version
            );
        }

        tx.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
        tx.commit()?;
    }

    Ok(())
}

/// Checks whether a column exists on a table using `PRAGMA table_info`.
fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, DatabaseError> {
    if !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(DatabaseError::Migration {
            version: 0,
            reason: format!("Invalid table name: {}", table),
        });
    }
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let exists = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .any(|r| r.map(|name| name == column).unwrap_or(false));
    Ok(exists)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        run_all(&mut conn).unwrap();
        conn
    }

    #[test]
    fn test_migrations_run_on_fresh_db() {
        let conn = fresh();
        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
        assert_eq!(latest_version(), 5);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let mut conn = fresh();
        run_all(&mut conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_column_exists_check() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE test_tbl (id TEXT, name TEXT);")
            .unwrap();

        assert!(column_exists(&conn, "test_tbl", "id").unwrap());
        assert!(!column_exists(&conn, "test_tbl", "missing").unwrap());
        assert!(column_exists(&conn, "bad;name", "id").is_err());
    }

    #[test]
    fn test_catalog_has_synced_at() {
        let conn = fresh();
        assert!(column_exists(&conn, "catalog_entries", "synced_at").unwrap());
    }

    #[test]
    fn test_upgrade_from_v1_keeps_pending_rows() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE _migrations (
                version INTEGER PRIMARY KEY,
                description TEXT NOT NULL,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );",
        )
        .unwrap();
        conn.execute_batch(MIGRATIONS[0].sql).unwrap();
        conn.execute(
            "INSERT INTO _migrations (version, description) VALUES (1, 'create_pending_submissions')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO pending_submissions (submission_ref, fields, captured_at)
             VALUES ('ref-1', '{\"dni\":\"12345678\"}', 1000)",
            [],
        )
        .unwrap();

        run_all(&mut conn).unwrap();

        let pending: u32 = conn
            .query_row("SELECT COUNT(*) FROM pending_submissions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(pending, 1);
        assert!(column_exists(&conn, "catalog_entries", "synced_at").unwrap());
    }

    #[test]
    fn test_upgrade_from_v4_carries_catalog_sync_time() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE _migrations (
                version INTEGER PRIMARY KEY,
                description TEXT NOT NULL,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );",
        )
        .unwrap();
        for migration in &MIGRATIONS[..4] {
            conn.execute_batch(migration.sql).unwrap();
            conn.execute(
                "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
                rusqlite::params![migration.version, migration.description],
            )
            .unwrap();
        }
        conn.execute(
            "INSERT INTO catalog_entries (id, level, name, synced_at)
             VALUES (1, 'Inicial', 'A', 77), (2, 'Inicial', 'B', 77)",
            [],
        )
        .unwrap();

        run_all(&mut conn).unwrap();

        let synced_at: i64 = conn
            .query_row("SELECT synced_at FROM catalog_sync WHERE id = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(synced_at, 77);
    }
}
