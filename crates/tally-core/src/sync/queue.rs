//! Queue synchronizer
//!
//! Replays the durable mutation queue against the remote backend in
//! FIFO order. One poisoned item never blocks the rest: each failure
//! bumps the item's retry count and processing moves on. At the retry
//! ceiling the item is dropped unconditionally - accepted data loss,
//! logged, with no dead-letter store.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::backend::RemoteBackend;
use crate::error::CoreError;
use crate::models::{row_id, QueueAction, QueueItem, Row, SyncSummary, ID_KEY};
use crate::store::LocalStore;

/// Replays queued mutations once connectivity is available
pub struct QueueSynchronizer {
    backend: Arc<dyn RemoteBackend>,
    store: Arc<LocalStore>,
    max_retries: u32,
}

impl QueueSynchronizer {
    pub fn new(backend: Arc<dyn RemoteBackend>, store: Arc<LocalStore>, max_retries: u32) -> Self {
        Self {
            backend,
            store,
            max_retries,
        }
    }

    /// Replay every pending mutation, in enqueue order
    pub async fn drain(&self) -> SyncSummary {
        let mut summary = SyncSummary::default();

        let items = match self.store.list_queue(None) {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "queue unavailable, skipping replay");
                summary.errors.push(e.to_string());
                return summary;
            }
        };

        if items.is_empty() {
            return summary;
        }
        info!(pending = items.len(), "replaying mutation queue");

        for item in items {
            match self.replay(&item).await {
                Ok(()) => {
                    if let Err(e) = self.store.remove_queue_item(item.id) {
                        warn!(id = item.id, error = %e, "failed to remove replayed item");
                    }
                    summary.succeeded += 1;
                }
                Err(e @ CoreError::RemoteRejected { .. }) => {
                    // Business rejection will never succeed on retry
                    error!(id = item.id, table = %item.table, error = %e, "queued mutation rejected, dropping");
                    summary.failed += 1;
                    summary.errors.push(e.to_string());
                    if let Err(e) = self.store.remove_queue_item(item.id) {
                        warn!(id = item.id, error = %e, "failed to drop rejected item");
                    }
                }
                Err(e) => {
                    summary.failed += 1;
                    summary.errors.push(e.to_string());
                    self.record_failure(&item, &e);
                }
            }
        }

        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            "queue replay finished"
        );
        summary
    }

    async fn replay(&self, item: &QueueItem) -> Result<(), CoreError> {
        debug!(id = item.id, action = item.action.as_str(), table = %item.table, "replaying");
        match item.action {
            QueueAction::Insert => {
                let server_row = self.backend.insert(&item.table, &item.payload).await?;

                // The optimistic entry under the temporary id gives way
                // to the server-assigned one.
                if let Some(temp_id) = &item.temp_id {
                    if let Err(e) = self.store.delete(&item.table, temp_id) {
                        warn!(table = %item.table, temp_id, error = %e, "temp-id evict failed");
                    }
                }
                self.cache(&item.table, &server_row);
                Ok(())
            }
            QueueAction::Update => {
                let id = payload_id(&item.payload)?;
                let mut patch = item.payload.clone();
                patch.remove(ID_KEY);
                let server_row = self.backend.update(&item.table, &id, &patch).await?;
                self.cache(&item.table, &server_row);
                Ok(())
            }
            QueueAction::Delete => {
                let id = payload_id(&item.payload)?;
                self.backend.delete(&item.table, &id).await?;
                if let Err(e) = self.store.delete(&item.table, &id) {
                    warn!(table = %item.table, id, error = %e, "cache evict failed");
                }
                Ok(())
            }
        }
    }

    fn record_failure(&self, item: &QueueItem, cause: &CoreError) {
        let attempts = match self.store.increment_retry(item.id) {
            Ok(count) => count,
            Err(e) => {
                warn!(id = item.id, error = %e, "retry bookkeeping failed");
                return;
            }
        };

        if attempts >= self.max_retries {
            let dropped = CoreError::QueueExhausted {
                id: item.id,
                attempts,
            };
            error!(table = %item.table, cause = %cause, "{}", dropped);
            if let Err(e) = self.store.remove_queue_item(item.id) {
                warn!(id = item.id, error = %e, "failed to drop exhausted item");
            }
        } else {
            debug!(id = item.id, attempts, cause = %cause, "replay failed, will retry");
        }
    }

    fn cache(&self, table: &str, row: &Row) {
        let Some(id) = row_id(row) else {
            warn!(table, "replayed row without id, not cached");
            return;
        };
        if let Err(e) = self.store.put(table, &id, row) {
            warn!(table, id, error = %e, "cache write failed");
        }
    }
}

fn payload_id(payload: &Row) -> Result<String, CoreError> {
    row_id(payload).ok_or_else(|| CoreError::RemoteRejected {
        status: 400,
        message: "queued payload has no id".into(),
    })
}
