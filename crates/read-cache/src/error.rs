//! Read cache error types.

use thiserror::Error;

/// Errors that can occur on the read path.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The cache backend cannot be reached right now.
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred in the cache backend.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The source of truth could not be read.
    #[error("Store error: {0}")]
    Store(#[from] storage::StorageError),

    /// A cached value could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for read cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
