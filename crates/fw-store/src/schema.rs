use rusqlite::{Connection, OptionalExtension};

use crate::error::{Result, StoreError};

pub const SCHEMA_VERSION: i64 = 1;

pub fn initialize(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;
    conn.pragma_update(None, "wal_autocheckpoint", 100)?;

    // Fails harmlessly on in-memory and fresh databases.
    if conn
        .execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
        .is_ok()
    {
        tracing::debug!("startup WAL checkpoint complete");
    }

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS metadata (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS frozen_anchors (
            id          INTEGER PRIMARY KEY,
            fragment_id INTEGER NOT NULL,
            pos_x       REAL NOT NULL,
            pos_y       REAL NOT NULL,
            pos_z       REAL NOT NULL,
            rot_w       REAL NOT NULL,
            rot_x       REAL NOT NULL,
            rot_y       REAL NOT NULL,
            rot_z       REAL NOT NULL
        );

        CREATE TABLE IF NOT EXISTS anchor_edges (
            id1 INTEGER NOT NULL,
            id2 INTEGER NOT NULL,
            PRIMARY KEY (id1, id2),
            CHECK (id1 < id2)
        );

        CREATE TABLE IF NOT EXISTS saved_anchors (
            id INTEGER PRIMARY KEY
        );

        CREATE TABLE IF NOT EXISTS named_trackables (
            name     TEXT PRIMARY KEY,
            pos_x    REAL NOT NULL,
            pos_y    REAL NOT NULL,
            pos_z    REAL NOT NULL,
            rot_w    REAL NOT NULL,
            rot_x    REAL NOT NULL,
            rot_y    REAL NOT NULL,
            rot_z    REAL NOT NULL,
            saved_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_anchor_fragment ON frozen_anchors(fragment_id);
        CREATE INDEX IF NOT EXISTS idx_edge_id2 ON anchor_edges(id2);
        ",
    )?;

    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?1)",
        [SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

/// Version recorded in `metadata`, or `None` for a database never initialized.
pub fn get_schema_version(conn: &Connection) -> Result<Option<i64>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    raw.map(|v| {
        v.parse::<i64>()
            .map_err(|e| StoreError::InvalidData(format!("schema_version '{v}': {e}")))
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();

        for table in &[
            "metadata",
            "frozen_anchors",
            "anchor_edges",
            "saved_anchors",
            "named_trackables",
        ] {
            let count: i64 = conn
                .query_row(&format!("SELECT count(*) FROM {table}"), [], |row| {
                    row.get(0)
                })
                .unwrap();
            assert_eq!(count, 0, "table {table} should exist and be empty");
        }
    }

    #[test]
    fn test_schema_version_set() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE metadata (key TEXT PRIMARY KEY, value TEXT NOT NULL);")
            .unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), None);
        initialize(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), Some(SCHEMA_VERSION));
    }

    #[test]
    fn test_idempotent_initialize() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        initialize(&conn).unwrap();
    }

    #[test]
    fn test_busy_timeout_set() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        let timeout: i64 = conn
            .query_row("PRAGMA busy_timeout", [], |row| row.get(0))
            .unwrap();
        assert_eq!(timeout, 5000);
    }

    #[test]
    fn test_edge_order_enforced() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        assert!(
            conn.execute("INSERT INTO anchor_edges (id1, id2) VALUES (5, 3)", [])
                .is_err()
        );
        conn.execute("INSERT INTO anchor_edges (id1, id2) VALUES (3, 5)", [])
            .unwrap();
    }
}
