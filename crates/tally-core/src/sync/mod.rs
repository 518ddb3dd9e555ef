//! Background synchronization
//!
//! Three layers: the queue synchronizer replays pending offline
//! mutations, the snapshot synchronizer refreshes bounded per-table
//! copies of remote data, and the orchestrator decides when either
//! runs.

pub mod orchestrator;
pub mod queue;
pub mod snapshot;

pub use orchestrator::SyncOrchestrator;
pub use queue::QueueSynchronizer;
pub use snapshot::SnapshotSynchronizer;
