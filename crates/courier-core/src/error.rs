//! Error types for constructing and decoding pipeline messages.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised while building or decoding messages.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Payload could not be serialized or deserialized as JSON.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Message fields violate a structural constraint.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

impl CoreError {
    /// Creates an invalid message error.
    pub fn invalid_message(message: impl Into<String>) -> Self {
        Self::InvalidMessage(message.into())
    }
}
