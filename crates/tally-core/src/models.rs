//! Data structures shared across the data layer
//!
//! Rows are opaque JSON objects: the remote backend owns the schema,
//! this layer only needs the `id` field and its own `_offline` marker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

/// Key of the row identifier inside a row payload
pub const ID_KEY: &str = "id";

/// Marker key set on rows that only exist locally so far
pub const OFFLINE_KEY: &str = "_offline";

/// Prefix of client-generated temporary identifiers
pub const TEMP_ID_PREFIX: &str = "offline-";

/// A row as exchanged with the remote service: an opaque JSON object
pub type Row = serde_json::Map<String, Value>;

/// Generate a temporary client-side identifier for an optimistic row.
///
/// Temporary ids are never sent to the network; the server assigns the
/// real id when the queued insert is replayed.
pub fn new_temp_id() -> String {
    format!("{}{}", TEMP_ID_PREFIX, uuid::Uuid::new_v4())
}

/// Whether an identifier is a client-generated temporary one
pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

/// Extract the row identifier from a payload, as a string
pub fn row_id(row: &Row) -> Option<String> {
    match row.get(ID_KEY)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Kind of mutation recorded in the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueAction {
    Insert,
    Update,
    Delete,
}

impl QueueAction {
    /// Stable string form used in the SQLite queue table
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueAction::Insert => "insert",
            QueueAction::Update => "update",
            QueueAction::Delete => "delete",
        }
    }

    /// Parse the string form back; unknown values are a storage error
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "insert" => Ok(QueueAction::Insert),
            "update" => Ok(QueueAction::Update),
            "delete" => Ok(QueueAction::Delete),
            other => Err(CoreError::StorageUnavailable(format!(
                "unknown queue action '{}'",
                other
            ))),
        }
    }
}

/// A durable record of a mutation performed while disconnected
///
/// Items are processed strictly in `id` order within one sync pass.
/// `retry_count` only ever increases; an item leaves the queue on
/// confirmed success, on hitting the retry ceiling, or when a later
/// offline edit cancels a still-pending optimistic insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    /// Monotonic id assigned by the store (SQLite rowid)
    pub id: i64,
    pub action: QueueAction,
    pub table: String,
    /// For inserts: the original payload, without the temporary id.
    /// For updates: the patch plus the target id. For deletes: the id.
    pub payload: Row,
    /// Temporary id of the optimistic row this insert produced locally
    pub temp_id: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: u32,
}

/// Queue depth and contents, polled by the UI status indicator
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub count: usize,
    pub items: Vec<QueueItem>,
}

/// Outcome of one queue replay pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

/// The consumer contract: `{ data, error }` pairs, never a thrown error
/// for expected failure modes.
#[derive(Debug)]
pub struct DataResult<T> {
    pub data: Option<T>,
    pub error: Option<CoreError>,
}

impl<T> DataResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
        }
    }

    pub fn failed(error: CoreError) -> Self {
        Self {
            data: None,
            error: Some(error),
        }
    }

    /// Partial success: data served with a non-fatal error attached
    pub fn degraded(data: T, error: CoreError) -> Self {
        Self {
            data: Some(data),
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// An authenticated session as issued by the remote auth service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub user_id: String,
    /// Unix timestamp (seconds) at which the access token expires
    pub expires_at: i64,
}

impl Session {
    /// Seconds until expiry; negative once expired
    pub fn expires_in(&self, now: DateTime<Utc>) -> i64 {
        self.expires_at - now.timestamp()
    }
}

/// Notifications from the underlying auth client's change stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// The access token was refreshed
    TokenRefreshed,
    /// The client believes the user signed out; carries whatever
    /// session it still had (none during rate-limit false alarms)
    SignedOut { session: Option<Session> },
}
