//! SQLite schema for the local store
//!
//! Three logical regions share one database file: the row cache
//! (last known remote snapshots), the durable mutation queue, and
//! small metadata facts such as per-table last-sync timestamps.

use rusqlite::{Connection, Result};

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Schema version tracking
        CREATE TABLE IF NOT EXISTS schema_info (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        -- Row cache: last known copy of each remote row.
        -- At most one entry per (tbl, row_id); writes replace atomically.
        CREATE TABLE IF NOT EXISTS cache (
            tbl TEXT NOT NULL,
            row_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            captured_at INTEGER NOT NULL,
            PRIMARY KEY (tbl, row_id)
        );

        -- Mutation queue: ordered, durable log of pending writes.
        -- The rowid doubles as the monotonic FIFO position.
        CREATE TABLE IF NOT EXISTS queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            action TEXT NOT NULL,
            tbl TEXT NOT NULL,
            payload TEXT NOT NULL,
            temp_id TEXT,
            enqueued_at INTEGER NOT NULL,
            retry_count INTEGER NOT NULL DEFAULT 0
        );

        -- Free-form metadata facts (e.g. last_sync:<table>)
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        );

        -- Query cached rows by table
        CREATE INDEX IF NOT EXISTS idx_cache_tbl ON cache(tbl);

        -- Queue lookups by table and by pending optimistic insert
        CREATE INDEX IF NOT EXISTS idx_queue_tbl ON queue(tbl);
        CREATE INDEX IF NOT EXISTS idx_queue_temp_id ON queue(temp_id);
        "#,
    )?;

    // Set schema version
    conn.execute(
        "INSERT OR REPLACE INTO schema_info (key, value) VALUES ('version', ?)",
        [SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<Option<i32>> {
    let mut stmt = conn.prepare("SELECT value FROM schema_info WHERE key = 'version'")?;
    let result: Result<String> = stmt.query_row([], |row| row.get(0));

    match result {
        Ok(version_str) => Ok(version_str.parse().ok()),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Check if schema needs initialization or migration
pub fn needs_init(conn: &Connection) -> bool {
    let table_exists: bool = conn
        .prepare("SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_info'")
        .and_then(|mut stmt| stmt.exists([]))
        .unwrap_or(false);

    if !table_exists {
        return true;
    }

    match get_schema_version(conn) {
        Ok(Some(v)) => v < SCHEMA_VERSION,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        assert!(tables.contains(&"cache".to_string()));
        assert!(tables.contains(&"queue".to_string()));
        assert!(tables.contains(&"meta".to_string()));
    }

    #[test]
    fn test_schema_version() {
        let conn = Connection::open_in_memory().unwrap();

        // Before init, needs init
        assert!(needs_init(&conn));

        init_schema(&conn).unwrap();

        // After init, has version and doesn't need init
        assert_eq!(get_schema_version(&conn).unwrap(), Some(SCHEMA_VERSION));
        assert!(!needs_init(&conn));
    }

    #[test]
    fn test_indexes_exist() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let indexes: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='index' AND name LIKE 'idx_%'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        assert!(indexes.contains(&"idx_cache_tbl".to_string()));
        assert!(indexes.contains(&"idx_queue_tbl".to_string()));
        assert!(indexes.contains(&"idx_queue_temp_id".to_string()));
    }
}
