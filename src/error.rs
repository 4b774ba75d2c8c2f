//! Error types for subscriptions, local writes, and query compilation.

use crate::types::SubscriptionKey;
use thiserror::Error;

/// Main error type for subscription and local-store operations.
///
/// `Clone` so that one shared establishment can hand the same failure to
/// every caller that joined it.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("Invalid entity name: {0:?}")]
    InvalidEntity(String),

    #[error("Connection error for {key}: {message}")]
    Connection {
        key: SubscriptionKey,
        message: String,
    },

    #[error("Timed out after {timeout_ms}ms waiting for subscription {key}")]
    SubscriptionTimeout { key: SubscriptionKey, timeout_ms: u64 },

    #[error("Reconnection exhausted for {key} after {attempts} attempts")]
    ReconnectionExhausted { key: SubscriptionKey, attempts: u32 },

    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    #[error("Record already exists: {0}")]
    DuplicateRecord(String),

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Establishment task failed for {key}: {message}")]
    TaskFailed {
        key: SubscriptionKey,
        message: String,
    },
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::MalformedEvent(e.to_string())
    }
}

/// Result type for subscription and local-store operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors raised while compiling a predicate tree into a filter string.
///
/// These indicate a caller bug, so they are never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("Unsupported filter operator `{name}` (supported: {supported})")]
    UnsupportedOperator {
        name: String,
        supported: &'static str,
    },

    #[error("Invalid arguments for `{name}`: {reason}")]
    InvalidArguments { name: String, reason: String },

    #[error("`in` on {field} needs at least one value")]
    EmptyIn { field: String },
}

/// Result type for query compilation.
pub type CompileResult<T> = std::result::Result<T, CompileError>;
