//! Core error taxonomy
//!
//! Every failure mode the data layer can hit maps to one of these
//! variants. Errors that are expected parts of offline operation
//! (`NetworkUnavailable`, `RateLimited`) are absorbed by the gateway
//! and synchronizers; only genuine business rejections reach callers,
//! and always as values - nothing in this crate panics or throws
//! across an await point.

use thiserror::Error;

/// Errors produced by the offline data layer
#[derive(Error, Debug)]
pub enum CoreError {
    /// No connectivity, or the connection itself failed.
    ///
    /// Expected during offline operation; the gateway falls back to
    /// the cache and queue instead of surfacing this.
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    /// The remote service rejected the request with a business error
    /// (constraint violation, validation failure, missing row).
    ///
    /// Surfaced to the caller verbatim and never retried.
    #[error("remote rejected request ({status}): {message}")]
    RemoteRejected { status: u16, message: String },

    /// Transient throttling from the remote service (HTTP 429 or a
    /// rate-limit shaped message). Retried or swallowed, never treated
    /// as a sign-out.
    #[error("rate limited by remote service: {0}")]
    RateLimited(String),

    /// The local persistence layer is broken or disabled.
    ///
    /// Callers treat this as "offline with no cache": cache and queue
    /// operations degrade to no-ops with a logged warning.
    #[error("local storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A queued mutation exceeded its retry ceiling and was dropped.
    #[error("queue item {id} exceeded {attempts} attempts and was dropped")]
    QueueExhausted { id: i64, attempts: u32 },

    /// The mutation queue is at its configured bound.
    #[error("mutation queue is full ({limit} items); mutation not recorded")]
    QueueFull { limit: usize },

    /// Session fetch or refresh failed for a non-rate-limit reason.
    #[error("session error: {0}")]
    Session(String),
}

impl CoreError {
    /// Whether this error represents a connectivity-class failure that
    /// should fall back to the offline path (cache read, queue write).
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            CoreError::NetworkUnavailable(_) | CoreError::RateLimited(_)
        )
    }

    /// Recognize a rate-limit response from its status code or message.
    ///
    /// Some gateways return 429, others bury the throttle in a message
    /// body with a different status, so both are checked.
    pub fn looks_rate_limited(status: u16, message: &str) -> bool {
        if status == 429 {
            return true;
        }
        let msg = message.to_lowercase();
        msg.contains("rate limit")
            || msg.contains("too many requests")
            || msg.contains("over_request_rate_limit")
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        CoreError::StorageUnavailable(e.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::StorageUnavailable(format!("payload serialization failed: {}", e))
    }
}

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;
