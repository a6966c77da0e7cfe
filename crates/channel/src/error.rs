use thiserror::Error;

/// Errors that can occur when talking to the channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The broker cannot be reached right now.
    #[error("Channel unavailable: {0}")]
    Unavailable(String),

    /// The delivery was already settled or never existed.
    #[error("Unknown delivery: {0}")]
    UnknownDelivery(i64),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ChannelError {
    /// Returns true for failures that may succeed if retried.
    pub fn is_transient(&self) -> bool {
        !matches!(self, ChannelError::UnknownDelivery(_))
    }
}

/// Result type for channel operations.
pub type Result<T> = std::result::Result<T, ChannelError>;
