//! Error types for cache and batching operations
//!
//! `CacheError` is the crate-wide error. `BatchError` is the failure handed to
//! every waiter of a batch, so it has to be cheap to clone.

use std::sync::Arc;
use thiserror::Error;

/// Main error type for cache operations
#[derive(Error, Debug)]
pub enum CacheError {
    /// Durable tier unreachable or holding malformed data
    #[error("Cache backend error during {operation}: {message}")]
    Backend { operation: String, message: String },

    /// The batched downstream call failed
    #[error("Downstream batch error: {0}")]
    DownstreamBatch(#[from] BatchError),

    /// Request data could not be fingerprinted
    #[error("Key derivation error: {0}")]
    KeyDerivation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

}

impl CacheError {
    /// Build a backend error for the given operation
    pub fn backend(operation: impl Into<String>, message: impl Into<String>) -> Self {
        CacheError::Backend {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::SerializationError(e.to_string())
    }
}

/// Failure shared by every waiter of one batch
#[derive(Error, Debug, Clone)]
pub enum BatchError {
    /// The downstream call returned an error
    #[error("downstream call for batch {batch_id} failed: {cause}")]
    Downstream {
        batch_id: uuid::Uuid,
        cause: Arc<anyhow::Error>,
    },

    /// The downstream call broke positional correspondence
    #[error("downstream returned {actual} results for {expected} payloads")]
    ResultCountMismatch { expected: usize, actual: usize },

    /// The flush task ended without resolving this waiter
    #[error("batch was aborted before it resolved")]
    Aborted,
}

impl BatchError {
    /// Whether two errors are the same shared failure instance
    pub fn is_same_failure(&self, other: &BatchError) -> bool {
        match (self, other) {
            (
                BatchError::Downstream { cause: a, .. },
                BatchError::Downstream { cause: b, .. },
            ) => Arc::ptr_eq(a, b),
            (
                BatchError::ResultCountMismatch { expected: e1, actual: a1 },
                BatchError::ResultCountMismatch { expected: e2, actual: a2 },
            ) => e1 == e2 && a1 == a2,
            (BatchError::Aborted, BatchError::Aborted) => true,
            _ => false,
        }
    }
}
