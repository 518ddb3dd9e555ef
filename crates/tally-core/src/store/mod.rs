//! Local store: durable cache, mutation queue, and metadata
//!
//! The `LocalStore` is the sole owner of everything that must survive a
//! process restart. Three regions live in one SQLite file:
//!
//! - **cache** - last known snapshot of remote rows, keyed by
//!   `(table, row_id)`
//! - **queue** - ordered log of mutations performed while disconnected
//! - **meta** - small facts such as `last_sync:<table>` timestamps
//!
//! All operations are atomic at single-entry granularity; callers never
//! need multi-entry transactions. Any underlying SQLite failure maps to
//! `CoreError::StorageUnavailable`, which callers treat as "offline with
//! no cache", not as a crash.

pub mod schema;

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::models::{QueueAction, QueueItem, Row};

use schema::{init_schema, needs_init};

/// Durable local store backing the gateway and synchronizers
pub struct LocalStore {
    conn: Mutex<Connection>,
    max_queue_len: usize,
}

impl LocalStore {
    /// Open or create the store at the configured path
    pub fn open(config: &Config) -> CoreResult<Self> {
        let path = config.sqlite_path();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CoreError::StorageUnavailable(format!(
                    "failed to create data directory {:?}: {}",
                    parent, e
                ))
            })?;
        }

        let conn = Connection::open(&path)?;
        Self::with_connection(conn, config.max_queue_len)
    }

    /// Open an in-memory store (for testing)
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?, 1000)
    }

    /// Open an in-memory store with a specific queue bound (for testing)
    pub fn open_in_memory_with_limit(max_queue_len: usize) -> CoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?, max_queue_len)
    }

    fn with_connection(conn: Connection, max_queue_len: usize) -> CoreResult<Self> {
        if needs_init(&conn) {
            init_schema(&conn)?;
        }
        Ok(Self {
            conn: Mutex::new(conn),
            max_queue_len,
        })
    }

    fn conn(&self) -> CoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| CoreError::StorageUnavailable("store mutex poisoned".into()))
    }

    /// Break the store so every operation fails with
    /// `StorageUnavailable` (degradation tests)
    #[cfg(test)]
    pub(crate) fn break_for_tests(&self) {
        let conn = &self.conn;
        std::thread::scope(|s| {
            let handle = s.spawn(|| {
                let _guard = conn.lock().unwrap();
                panic!("storage disabled");
            });
            let _ = handle.join();
        });
    }

    // ==================== Cache ====================

    /// Insert or replace the cached copy of a row
    pub fn put(&self, table: &str, row_id: &str, payload: &Row) -> CoreResult<()> {
        let json = serde_json::to_string(payload)?;
        self.conn()?.execute(
            "INSERT OR REPLACE INTO cache (tbl, row_id, payload, captured_at) VALUES (?, ?, ?, ?)",
            params![table, row_id, json, Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    /// Get the cached copy of a row, if any
    pub fn get(&self, table: &str, row_id: &str) -> CoreResult<Option<Row>> {
        let conn = self.conn()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT payload FROM cache WHERE tbl = ? AND row_id = ?",
                params![table, row_id],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(j) => Ok(Some(serde_json::from_str(&j)?)),
            None => Ok(None),
        }
    }

    /// Get all cached rows for a table, in capture order
    pub fn get_all_by_table(&self, table: &str) -> CoreResult<Vec<Row>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT payload FROM cache WHERE tbl = ? ORDER BY captured_at ASC, row_id ASC",
        )?;
        let payloads = stmt.query_map(params![table], |row| row.get::<_, String>(0))?;

        let mut rows = Vec::new();
        for json in payloads {
            rows.push(serde_json::from_str(&json?)?);
        }
        Ok(rows)
    }

    /// Remove the cached copy of a row
    pub fn delete(&self, table: &str, row_id: &str) -> CoreResult<()> {
        self.conn()?.execute(
            "DELETE FROM cache WHERE tbl = ? AND row_id = ?",
            params![table, row_id],
        )?;
        Ok(())
    }

    /// Drop every cached row for a table (snapshot refresh)
    pub fn clear_table(&self, table: &str) -> CoreResult<()> {
        self.conn()?
            .execute("DELETE FROM cache WHERE tbl = ?", params![table])?;
        Ok(())
    }

    // ==================== Queue ====================

    /// Append a mutation to the queue, returning its monotonic id
    ///
    /// Fails with `QueueFull` at the configured bound instead of
    /// silently evicting older intents.
    pub fn enqueue(
        &self,
        action: QueueAction,
        table: &str,
        payload: &Row,
        temp_id: Option<&str>,
    ) -> CoreResult<i64> {
        let json = serde_json::to_string(payload)?;
        let conn = self.conn()?;

        // Count and insert under one guard so concurrent enqueues
        // cannot both pass the bound check.
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM queue", [], |row| row.get(0))?;
        if count as usize >= self.max_queue_len {
            return Err(CoreError::QueueFull {
                limit: self.max_queue_len,
            });
        }

        conn.execute(
            "INSERT INTO queue (action, tbl, payload, temp_id, enqueued_at, retry_count)
             VALUES (?, ?, ?, ?, ?, 0)",
            params![
                action.as_str(),
                table,
                json,
                temp_id,
                Utc::now().timestamp_millis()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// List pending mutations in enqueue (FIFO) order
    pub fn list_queue(&self, table: Option<&str>) -> CoreResult<Vec<QueueItem>> {
        let conn = self.conn()?;
        let mut items = Vec::new();

        let mut collect = |stmt: &mut rusqlite::Statement<'_>,
                           params: &[&dyn rusqlite::ToSql]|
         -> CoreResult<()> {
            let rows = stmt.query_map(params, |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, u32>(6)?,
                ))
            })?;
            for row in rows {
                let (id, action, tbl, payload, temp_id, enqueued_at, retry_count) = row?;
                items.push(QueueItem {
                    id,
                    action: QueueAction::parse(&action)?,
                    table: tbl,
                    payload: serde_json::from_str(&payload)?,
                    temp_id,
                    enqueued_at: DateTime::from_timestamp_millis(enqueued_at)
                        .unwrap_or_else(Utc::now),
                    retry_count,
                });
            }
            Ok(())
        };

        const COLS: &str = "id, action, tbl, payload, temp_id, enqueued_at, retry_count";
        match table {
            Some(t) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM queue WHERE tbl = ? ORDER BY id ASC",
                    COLS
                ))?;
                collect(&mut stmt, &[&t])?;
            }
            None => {
                let mut stmt =
                    conn.prepare(&format!("SELECT {} FROM queue ORDER BY id ASC", COLS))?;
                collect(&mut stmt, &[])?;
            }
        }

        Ok(items)
    }

    /// Remove a queue item after confirmed success (or ceiling/cancel)
    pub fn remove_queue_item(&self, id: i64) -> CoreResult<()> {
        self.conn()?
            .execute("DELETE FROM queue WHERE id = ?", params![id])?;
        Ok(())
    }

    /// Bump an item's retry count, returning the new value
    pub fn increment_retry(&self, id: i64) -> CoreResult<u32> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE queue SET retry_count = retry_count + 1 WHERE id = ?",
            params![id],
        )?;
        let count: u32 = conn.query_row(
            "SELECT retry_count FROM queue WHERE id = ?",
            params![id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Number of pending mutations
    pub fn queue_len(&self) -> CoreResult<usize> {
        let count: i64 =
            self.conn()?
                .query_row("SELECT COUNT(*) FROM queue", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Find the still-pending insert that produced an optimistic row
    pub fn find_pending_insert(&self, table: &str, temp_id: &str) -> CoreResult<Option<QueueItem>> {
        let items = self.list_queue(Some(table))?;
        Ok(items
            .into_iter()
            .find(|i| i.action == QueueAction::Insert && i.temp_id.as_deref() == Some(temp_id)))
    }

    /// Replace a queued item's payload (temp-id edit fold-in)
    pub fn update_queue_payload(&self, id: i64, payload: &Row) -> CoreResult<()> {
        let json = serde_json::to_string(payload)?;
        self.conn()?.execute(
            "UPDATE queue SET payload = ? WHERE id = ?",
            params![json, id],
        )?;
        Ok(())
    }

    // ==================== Metadata ====================

    /// Set a metadata fact, stamping it with the current time
    pub fn set_meta(&self, key: &str, value: &str) -> CoreResult<()> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO meta (key, value, updated_at) VALUES (?, ?, ?)",
            params![key, value, Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    /// Get a metadata fact and when it was last written
    pub fn get_meta(&self, key: &str) -> CoreResult<Option<(String, DateTime<Utc>)>> {
        let result: Option<(String, i64)> = self
            .conn()?
            .query_row(
                "SELECT value, updated_at FROM meta WHERE key = ?",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(result.map(|(value, ms)| {
            (
                value,
                DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now),
            )
        }))
    }
}

/// Metadata key under which a table's last successful sync is recorded
pub fn last_sync_key(table: &str) -> String {
    format!("last_sync:{}", table)
}
