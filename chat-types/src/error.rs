//! Error types for the linkchat codec.

use thiserror::Error;

/// Encoding a message failed.
#[derive(Debug, Error)]
pub enum CodecError {
    /// JSON serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),
}

/// A wire payload could not be turned into a message.
///
/// Every variant means the same thing to the caller: drop the payload.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Payload ended before a complete message was read
    #[error("truncated payload: {0}")]
    Truncated(#[source] serde_json::Error),

    /// Payload is not well-formed JSON
    #[error("malformed payload: {0}")]
    Malformed(#[source] serde_json::Error),

    /// Payload is JSON but does not match the message schema
    #[error("schema violation: {0}")]
    Schema(#[source] serde_json::Error),

    /// Message text is empty or whitespace-only
    #[error("message text is empty")]
    EmptyText,

    /// Payload exceeds the maximum accepted size
    #[error("payload too large: {size} bytes (limit: {limit} bytes)")]
    TooLarge {
        /// Actual payload size.
        size: usize,
        /// Maximum accepted size.
        limit: usize,
    },
}

impl DecodeError {
    pub(crate) fn from_json(err: serde_json::Error) -> Self {
        use serde_json::error::Category;
        match err.classify() {
            Category::Eof => Self::Truncated(err),
            Category::Syntax | Category::Io => Self::Malformed(err),
            Category::Data => Self::Schema(err),
        }
    }
}
