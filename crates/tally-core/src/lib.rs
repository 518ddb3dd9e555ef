//! Tally Core Library
//!
//! This crate provides the core functionality for Tally, an
//! offline-first data layer for a small-business admin panel. The
//! admin panel keeps working on an unreliable connection: reads fall
//! back to a durable local cache, writes queue locally and replay when
//! connectivity returns, and the session layer never signs the user
//! out over a transient rate limit.
//!
//! # Architecture
//!
//! - **SQLite**: durable cache of remote rows plus the offline
//!   mutation queue, both surviving restarts
//! - **Gateway**: the one read/write surface the application uses;
//!   routes online, falls back offline
//! - **Orchestrator**: drains the queue and refreshes table snapshots
//!   on reconnect, on a timer, or on demand
//! - **SessionGuard**: cached, throttled, single-flight session
//!   handling over the remote auth client
//!
//! # Quick Start
//!
//! ```text
//! let config = Config::load()?;
//! let store = Arc::new(LocalStore::open(&config)?);
//! let backend = Arc::new(HttpBackend::new(&api_url, timeout)?);
//! let signal = ConnectivitySignal::new(true);
//!
//! let gateway = Gateway::new(backend.clone(), store.clone(), signal.clone());
//! let result = gateway.select("sales", None).await;
//! ```
//!
//! # Modules
//!
//! - `gateway`: Offline-aware read/write surface (main entry point)
//! - `store`: SQLite cache, mutation queue, and sync metadata
//! - `sync`: Queue replay, snapshot refresh, and the orchestrator
//! - `session`: Resilient session guard over the auth backend
//! - `backend`: Remote data and auth client traits plus the HTTP impl
//! - `connectivity`: Shared online/offline signal
//! - `models`: Rows, queue items, sessions, and result envelopes
//! - `config`: Application configuration

pub mod backend;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod gateway;
pub mod models;
pub mod session;
pub mod store;
pub mod sync;

#[cfg(test)]
pub mod testutil;

pub use backend::{AuthBackend, Filter, HttpBackend, RemoteBackend};
pub use config::Config;
pub use connectivity::ConnectivitySignal;
pub use error::{CoreError, CoreResult};
pub use gateway::Gateway;
pub use models::{
    AuthEvent, DataResult, QueueAction, QueueItem, QueueStatus, Row, Session, SyncSummary,
};
pub use session::{SessionGuard, SessionGuardConfig};
pub use store::LocalStore;
pub use sync::{QueueSynchronizer, SnapshotSynchronizer, SyncOrchestrator};
