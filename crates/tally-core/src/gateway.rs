//! Offline-aware data gateway
//!
//! The single entry point application code uses for reads and writes.
//! Every call consults the connectivity signal and either goes to the
//! network (reconciling results into the cache) or serves the local
//! snapshot, queueing mutations for later replay.
//!
//! The contract with callers is "best-effort freshness, never data
//! unavailable while any cache exists": reads fall back to the cache
//! on any connectivity failure, and writes succeed optimistically with
//! a temporary id and an `_offline` marker.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::backend::{Filter, RemoteBackend};
use crate::connectivity::ConnectivitySignal;
use crate::error::CoreError;
use crate::models::{
    is_temp_id, new_temp_id, row_id, DataResult, QueueAction, Row, ID_KEY, OFFLINE_KEY,
};
use crate::store::{last_sync_key, LocalStore};

/// Offline-aware entry point for per-table reads and writes
pub struct Gateway {
    backend: Arc<dyn RemoteBackend>,
    store: Arc<LocalStore>,
    signal: ConnectivitySignal,
}

impl Gateway {
    /// Construct with injected collaborators (no globals)
    pub fn new(
        backend: Arc<dyn RemoteBackend>,
        store: Arc<LocalStore>,
        signal: ConnectivitySignal,
    ) -> Self {
        Self {
            backend,
            store,
            signal,
        }
    }

    /// Query a table, preferring the network and falling back to cache
    pub async fn select(&self, table: &str, filter: Option<&Filter>) -> DataResult<Vec<Row>> {
        if self.signal.is_online() {
            match self.backend.select(table, filter, None).await {
                Ok(rows) => {
                    self.reconcile_into_cache(table, &rows);
                    return DataResult::ok(rows);
                }
                Err(e) if e.is_connectivity() => {
                    warn!(table, error = %e, "select failed despite online signal, serving cache");
                }
                Err(e) => {
                    // Reads never come back empty while a cache exists:
                    // a rejected query still serves the snapshot, with
                    // the error attached for the caller to inspect.
                    warn!(table, error = %e, "select rejected, serving cache degraded");
                    return match self.store.get_all_by_table(table) {
                        Ok(rows) => DataResult::degraded(apply_filter(rows, filter), e),
                        Err(_) => DataResult::failed(e),
                    };
                }
            }
        }

        // Offline (or network just failed): serve the cached snapshot
        match self.store.get_all_by_table(table) {
            Ok(rows) => DataResult::ok(apply_filter(rows, filter)),
            Err(e) => {
                warn!(table, error = %e, "cache read failed while offline");
                DataResult::degraded(Vec::new(), e)
            }
        }
    }

    /// Insert a row, optimistically when the network is unreachable
    pub async fn insert(&self, table: &str, row: Row) -> DataResult<Row> {
        if self.signal.is_online() {
            match self.backend.insert(table, &row).await {
                Ok(server_row) => {
                    self.cache_row(table, &server_row);
                    return DataResult::ok(server_row);
                }
                Err(e) if e.is_connectivity() => {
                    debug!(table, error = %e, "insert falling back to queue");
                }
                // Business rejection: surfaced verbatim, nothing queued
                Err(e) => return DataResult::failed(e),
            }
        }

        self.queue_insert(table, row)
    }

    /// Update a row, writing through or merging into the cached copy
    pub async fn update(&self, table: &str, id: &str, patch: Row) -> DataResult<Row> {
        if self.signal.is_online() && !is_temp_id(id) {
            match self.backend.update(table, id, &patch).await {
                Ok(server_row) => {
                    self.cache_row(table, &server_row);
                    return DataResult::ok(server_row);
                }
                Err(e) if e.is_connectivity() => {
                    debug!(table, id, error = %e, "update falling back to queue");
                }
                Err(e) => return DataResult::failed(e),
            }
        }

        self.queue_update(table, id, patch)
    }

    /// Delete a row, writing through or enqueueing the deletion
    pub async fn delete(&self, table: &str, id: &str) -> DataResult<()> {
        if self.signal.is_online() && !is_temp_id(id) {
            match self.backend.delete(table, id).await {
                Ok(()) => {
                    if let Err(e) = self.store.delete(table, id) {
                        warn!(table, id, error = %e, "cache evict failed");
                    }
                    return DataResult::ok(());
                }
                Err(e) if e.is_connectivity() => {
                    debug!(table, id, error = %e, "delete falling back to queue");
                }
                Err(e) => return DataResult::failed(e),
            }
        }

        self.queue_delete(table, id)
    }

    // ==================== Offline paths ====================

    fn queue_insert(&self, table: &str, row: Row) -> DataResult<Row> {
        let temp_id = new_temp_id();

        let mut tagged = row.clone();
        tagged.insert(ID_KEY.to_string(), Value::String(temp_id.clone()));
        tagged.insert(OFFLINE_KEY.to_string(), Value::Bool(true));

        // The queue carries the original payload; the temporary id is
        // bookkeeping only and must never reach the network.
        if let Err(e) = self
            .store
            .enqueue(QueueAction::Insert, table, &row, Some(&temp_id))
        {
            return DataResult::failed(e);
        }
        if let Err(e) = self.store.put(table, &temp_id, &tagged) {
            warn!(table, error = %e, "optimistic cache write failed");
        }

        DataResult::ok(tagged)
    }

    fn queue_update(&self, table: &str, id: &str, patch: Row) -> DataResult<Row> {
        if is_temp_id(id) {
            return self.fold_into_pending_insert(table, id, patch);
        }

        let mut merged = match self.store.get(table, id) {
            Ok(Some(cached)) => cached,
            Ok(None) => {
                let mut base = Row::new();
                base.insert(ID_KEY.to_string(), Value::String(id.to_string()));
                base
            }
            Err(e) => return DataResult::failed(e),
        };
        for (k, v) in &patch {
            merged.insert(k.clone(), v.clone());
        }
        merged.insert(OFFLINE_KEY.to_string(), Value::Bool(true));

        let mut queued = patch;
        queued.insert(ID_KEY.to_string(), Value::String(id.to_string()));
        if let Err(e) = self.store.enqueue(QueueAction::Update, table, &queued, None) {
            return DataResult::failed(e);
        }
        if let Err(e) = self.store.put(table, id, &merged) {
            warn!(table, id, error = %e, "offline cache merge failed");
        }

        DataResult::ok(merged)
    }

    /// Edits to a row whose insert is still queued fold into that one
    /// queue item: the patch lands in both the cached copy and the
    /// pending insert payload, and no second item is created.
    fn fold_into_pending_insert(&self, table: &str, temp_id: &str, patch: Row) -> DataResult<Row> {
        let pending = match self.store.find_pending_insert(table, temp_id) {
            Ok(p) => p,
            Err(e) => return DataResult::failed(e),
        };

        if let Some(item) = pending {
            let mut payload = item.payload;
            for (k, v) in &patch {
                payload.insert(k.clone(), v.clone());
            }
            if let Err(e) = self.store.update_queue_payload(item.id, &payload) {
                return DataResult::failed(e);
            }
        } else {
            // Insert already replayed (or dropped); only the cache copy
            // under the temporary id is left to patch.
            warn!(table, temp_id, "patching optimistic row with no pending insert");
        }

        let mut merged = match self.store.get(table, temp_id) {
            Ok(Some(cached)) => cached,
            _ => {
                let mut base = Row::new();
                base.insert(ID_KEY.to_string(), Value::String(temp_id.to_string()));
                base
            }
        };
        for (k, v) in &patch {
            merged.insert(k.clone(), v.clone());
        }
        merged.insert(OFFLINE_KEY.to_string(), Value::Bool(true));
        if let Err(e) = self.store.put(table, temp_id, &merged) {
            warn!(table, temp_id, error = %e, "offline cache merge failed");
        }

        DataResult::ok(merged)
    }

    fn queue_delete(&self, table: &str, id: &str) -> DataResult<()> {
        if is_temp_id(id) {
            // Deleting a never-synced optimistic row cancels its queued
            // insert; the server never hears about either.
            match self.store.find_pending_insert(table, id) {
                Ok(Some(item)) => {
                    if let Err(e) = self.store.remove_queue_item(item.id) {
                        return DataResult::failed(e);
                    }
                }
                Ok(None) => {}
                Err(e) => return DataResult::failed(e),
            }
            if let Err(e) = self.store.delete(table, id) {
                warn!(table, id, error = %e, "cache evict failed");
            }
            return DataResult::ok(());
        }

        let mut payload = Row::new();
        payload.insert(ID_KEY.to_string(), Value::String(id.to_string()));
        if let Err(e) = self.store.enqueue(QueueAction::Delete, table, &payload, None) {
            return DataResult::failed(e);
        }
        if let Err(e) = self.store.delete(table, id) {
            warn!(table, id, error = %e, "cache evict failed");
        }

        DataResult::ok(())
    }

    // ==================== Cache reconciliation ====================

    fn reconcile_into_cache(&self, table: &str, rows: &[Row]) {
        for row in rows {
            self.cache_row(table, row);
        }
        if let Err(e) = self
            .store
            .set_meta(&last_sync_key(table), &chrono::Utc::now().to_rfc3339())
        {
            warn!(table, error = %e, "last-sync stamp failed");
        }
    }

    fn cache_row(&self, table: &str, row: &Row) {
        let Some(id) = row_id(row) else {
            warn!(table, "network row without id, not cached");
            return;
        };
        if let Err(e) = self.store.put(table, &id, row) {
            warn!(table, id, error = %e, "cache write failed");
        }
    }
}

fn apply_filter(mut rows: Vec<Row>, filter: Option<&Filter>) -> Vec<Row> {
    if let Some(filter) = filter {
        rows.retain(|row| filter.iter().all(|(k, v)| row.get(k) == Some(v)));
    }
    rows
}
