//! Database schema migrations for studia.
//!
//! Migrations are versioned and applied automatically when opening the database.
//! The `schema_version` table tracks the current migration version.

use rusqlite::{Connection, Result as SqliteResult};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 2;

/// Apply all pending migrations to bring the database to the current schema version.
///
/// # Errors
/// Returns an error if migration fails.
pub fn migrate(conn: &Connection) -> SqliteResult<()> {
    create_schema_version_table(conn)?;

    let current_version = get_schema_version(conn);

    if current_version < 1 {
        migrate_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Returns 0 if no version is set (initial database).
pub fn get_schema_version(conn: &Connection) -> i32 {
    conn.query_row("SELECT version FROM schema_version", [], |row| {
        row.get::<_, i32>(0)
    })
    .unwrap_or_else(|e| {
        if !matches!(e, rusqlite::Error::QueryReturnedNoRows) {
            tracing::warn!(error = %e, "failed to read schema_version");
        }
        0
    })
}

fn set_schema_version(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Migration v1: session and block outcomes.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS session_outcomes (
            id                 TEXT PRIMARY KEY,
            student_id         TEXT NOT NULL,
            assignment_id      TEXT NOT NULL,
            session_name       TEXT NOT NULL,
            completed_items    INTEGER NOT NULL,
            omitted_items      INTEGER NOT NULL,
            total_elapsed_secs INTEGER NOT NULL,
            end_reason         TEXT NOT NULL,
            finished_at        TEXT NOT NULL,
            payload            TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS block_outcomes (
            session_outcome_id TEXT NOT NULL REFERENCES session_outcomes(id),
            position           INTEGER NOT NULL,
            code               TEXT NOT NULL,
            backpack_key       TEXT NOT NULL,
            outcome            TEXT NOT NULL,
            elapsed_secs       INTEGER NOT NULL,
            payload            TEXT NOT NULL,
            PRIMARY KEY (session_outcome_id, position)
        );",
    )?;
    set_schema_version(&tx, 1)?;
    tx.commit()
}

/// Migration v2: per-student backpack progress.
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS backpack (
            student_id               TEXT NOT NULL,
            backpack_key             TEXT NOT NULL,
            status                   TEXT NOT NULL,
            mastery_score            INTEGER NOT NULL DEFAULT 0,
            last_practised_at        TEXT,
            mastered_weeks           TEXT NOT NULL DEFAULT '[]',
            last_mastered_week_start TEXT,
            updated_at               TEXT NOT NULL,
            PRIMARY KEY (student_id, backpack_key)
        );",
    )?;
    set_schema_version(&tx, 2)?;
    tx.commit()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_from_scratch() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);

        for table in ["session_outcomes", "block_outcomes", "backpack"] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table {table}");
        }
    }

    #[test]
    fn test_migrate_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);
    }

    #[test]
    fn test_incremental_migration() {
        let conn = Connection::open_in_memory().unwrap();
        create_schema_version_table(&conn).unwrap();
        migrate_v1(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), 1);

        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), 2);
        let stmt = conn
            .prepare("SELECT status, mastered_weeks FROM backpack")
            .unwrap();
        drop(stmt);
    }
}
