//! Error types for the key/value option store

use thiserror::Error;

/// Result type alias for key/value store operations
pub type Result<T> = std::result::Result<T, KvError>;

/// Errors raised by a [`KvStore`](crate::kv::KvStore) backend
#[derive(Error, Debug)]
pub enum KvError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid key '{0}': keys may only contain ASCII letters, digits, '-', '_' and '.'")]
    InvalidKey(String),

    #[error("Store backend error: {0}")]
    Backend(String),
}

impl KvError {
    /// Create a backend error
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}
