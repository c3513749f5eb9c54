// Backend error types
//
// Store and cache failures stay inside the pipeline: they are logged by the
// tracker and the real-time cache, never returned to a `track` caller.

use thiserror::Error;

/// Errors from the column store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Could not reach the store
    #[error("connection error: {0}")]
    Connection(String),

    /// The store answered with an error status
    #[error("query failed with status {status}: {body}")]
    Query { status: u16, body: String },

    /// A row or payload could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The store refused the operation
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Errors from the key-value cache
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("command {command} failed: {message}")]
    Command {
        command: &'static str,
        message: String,
    },

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}
