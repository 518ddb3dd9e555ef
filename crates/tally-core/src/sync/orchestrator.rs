//! Sync orchestrator
//!
//! Listens for connectivity transitions and runs the queue synchronizer
//! followed (when the queue is empty) by the snapshot synchronizer, on
//! reconnect, on a periodic timer while online, or on a manual trigger.
//!
//! Exactly one sync pass runs at a time: a re-entrant trigger while a
//! pass is in flight is a no-op. The periodic timer stops while
//! offline; in-flight network calls are never cancelled, they fail
//! naturally. Observers watch `Idle`/`Syncing` transitions; queue depth
//! is polled from the store, not pushed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::connectivity::ConnectivitySignal;
use crate::error::CoreResult;
use crate::models::{QueueStatus, SyncSummary};
use crate::store::LocalStore;
use crate::sync::queue::QueueSynchronizer;
use crate::sync::snapshot::SnapshotSynchronizer;

/// Coordinates queue replay and snapshot refresh
///
/// Explicitly constructed with its collaborators and held by
/// application start-up code; not a module-level singleton.
pub struct SyncOrchestrator {
    queue_sync: QueueSynchronizer,
    snapshot_sync: SnapshotSynchronizer,
    store: Arc<LocalStore>,
    signal: ConnectivitySignal,
    interval: Duration,
    in_flight: AtomicBool,
    state_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<bool>,
    trigger_tx: mpsc::Sender<()>,
    trigger_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl SyncOrchestrator {
    pub fn new(
        queue_sync: QueueSynchronizer,
        snapshot_sync: SnapshotSynchronizer,
        store: Arc<LocalStore>,
        signal: ConnectivitySignal,
        interval: Duration,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(false);
        let (trigger_tx, trigger_rx) = mpsc::channel(8);

        Self {
            queue_sync,
            snapshot_sync,
            store,
            signal,
            interval,
            in_flight: AtomicBool::new(false),
            state_tx,
            state_rx,
            trigger_tx,
            trigger_rx: Mutex::new(Some(trigger_rx)),
        }
    }

    /// Whether a sync pass is currently running
    pub fn is_syncing(&self) -> bool {
        *self.state_rx.borrow()
    }

    /// Subscribe to syncing (`true`) / idle (`false`) transitions
    pub fn subscribe_sync_state(&self) -> watch::Receiver<bool> {
        self.state_rx.clone()
    }

    /// Queue depth and contents, polled from the store
    pub fn queue_status(&self) -> CoreResult<QueueStatus> {
        let items = self.store.list_queue(None)?;
        Ok(QueueStatus {
            count: items.len(),
            items,
        })
    }

    /// Ask the background task for a sync pass (fire-and-forget)
    pub fn trigger_sync(&self) {
        if self.trigger_tx.try_send(()).is_err() {
            // Channel full: a pass is already requested
            debug!("sync trigger coalesced");
        }
    }

    /// Run one sync pass inline
    ///
    /// Returns `None` when another pass is already in flight (the
    /// single-flight guarantee: the caller's trigger is a no-op).
    pub async fn sync_now(&self) -> Option<SyncSummary> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("sync already in progress, trigger ignored");
            return None;
        }

        let _ = self.state_tx.send(true);
        info!("sync pass started");

        let mut summary = self.queue_sync.drain().await;

        // Snapshots only after the queue is drained (or was empty), so
        // stale server rows never clobber pending local edits.
        match self.store.queue_len() {
            Ok(0) => {
                let snap = self.snapshot_sync.refresh_all().await;
                summary.errors.extend(snap.errors);
            }
            Ok(pending) => {
                debug!(pending, "queue not empty, snapshot refresh skipped");
            }
            Err(e) => warn!(error = %e, "queue depth unavailable, snapshot refresh skipped"),
        }

        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            "sync pass finished"
        );
        let _ = self.state_tx.send(false);
        self.in_flight.store(false, Ordering::SeqCst);

        Some(summary)
    }

    /// Spawn the background task driving periodic and reconnect syncs
    ///
    /// May be called once; subsequent calls return `None`.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut trigger_rx = self.trigger_rx.lock().ok()?.take()?;
        let this = self.clone();

        Some(tokio::spawn(async move {
            let mut conn_rx = this.signal.subscribe();

            loop {
                if this.signal.is_online() {
                    tokio::select! {
                        _ = tokio::time::sleep(this.interval) => {
                            this.sync_now().await;
                        }
                        changed = conn_rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            // Timer restarts; a fresh `online` runs a pass
                            if *conn_rx.borrow_and_update() {
                                this.sync_now().await;
                            }
                        }
                        trigger = trigger_rx.recv() => {
                            match trigger {
                                Some(()) => {
                                    this.sync_now().await;
                                }
                                None => break,
                            }
                        }
                    }
                } else {
                    // Offline: no timer, wait for reconnect or shutdown
                    tokio::select! {
                        changed = conn_rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            if *conn_rx.borrow_and_update() {
                                info!("connectivity restored, syncing");
                                this.sync_now().await;
                            }
                        }
                        trigger = trigger_rx.recv() => {
                            match trigger {
                                // Manual triggers while offline are dropped
                                Some(()) => debug!("sync trigger ignored while offline"),
                                None => break,
                            }
                        }
                    }
                }
            }
        }))
    }
}
