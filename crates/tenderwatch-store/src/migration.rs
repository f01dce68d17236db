//! SQLite schema: the `data` and `tenders` tables plus a version log.
//!
//! `schema_migrations` records every applied version; opening a database runs
//! whatever versions it has not seen yet in a single transaction.

use rusqlite::Connection;

use crate::clock::now_secs;
use crate::error::{Result, StoreError};

pub const CURRENT_VERSION: u32 = 1;

/// Bring `conn` up to [`CURRENT_VERSION`]. A no-op on an up-to-date database.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at REAL NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            step(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_secs()],
            )?;
        }

        tx.commit()?;
    }

    Ok(())
}

/// Drop every table, including the migration history.
pub fn drop_all(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        DROP TABLE IF EXISTS data;
        DROP TABLE IF EXISTS tenders;
        DROP TABLE IF EXISTS schema_migrations;
        "#,
    )?;
    Ok(())
}

fn step(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => create_tables(conn),
        other => Err(StoreError::Migration(format!("no migration to version {other}"))),
    }
}

/// Both tables share one layout; `model` is NULL for tenders.
fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Content-addressed records
        CREATE TABLE data (
            id TEXT PRIMARY KEY,          -- content hash, 32 hex chars
            ts REAL NOT NULL,             -- server insert time, seconds since epoch
            model TEXT,                   -- envelope.model, for reference checks
            doc TEXT NOT NULL             -- the record as JSON
        );
        CREATE INDEX idx_data_ts ON data(ts);

        -- Mirror of the external tender feed
        CREATE TABLE tenders (
            id TEXT PRIMARY KEY,
            ts REAL NOT NULL,
            model TEXT,
            doc TEXT NOT NULL
        );
        CREATE INDEX idx_tenders_ts ON tenders(ts);
        "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        conn
    }

    fn count(conn: &Connection, sql: &str) -> i64 {
        conn.query_row(sql, [], |row| row.get(0)).unwrap()
    }

    #[test]
    fn test_fresh_database_has_both_tables() {
        let conn = fresh();
        let version: u32 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, CURRENT_VERSION);
        assert_eq!(
            count(&conn, "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('data', 'tenders')"),
            2
        );
        assert_eq!(
            count(&conn, "SELECT COUNT(*) FROM sqlite_master WHERE type='index' AND name LIKE 'idx_%_ts'"),
            2
        );
    }

    #[test]
    fn test_second_migrate_applies_nothing() {
        let mut conn = fresh();
        migrate(&mut conn).unwrap();
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM schema_migrations"), 1);
    }

    #[test]
    fn test_duplicate_id_rejected_by_schema() {
        let conn = fresh();
        let insert = "INSERT INTO data (id, ts, model, doc) VALUES ('a', ?1, 'form/x', '{}')";
        conn.execute(insert, [1.0]).unwrap();
        assert!(conn.execute(insert, [2.0]).is_err());
    }

    #[test]
    fn test_drop_all_empties_database() {
        let mut conn = fresh();
        conn.execute("INSERT INTO tenders (id, ts, doc) VALUES ('t', 1.0, '{}')", [])
            .unwrap();
        drop_all(&mut conn).unwrap();
        migrate(&mut conn).unwrap();
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM tenders"), 0);
    }
}
