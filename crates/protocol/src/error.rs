//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering frame and body encoding failures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Failed to serialize data.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Failed to deserialize data.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// A frame arrived with a `type` tag this client does not handle.
    #[error("unsupported frame type: {0}")]
    UnsupportedFrame(String),

    /// An address could not be turned into an API or stream URL.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_eof() || err.is_syntax() {
            ProtocolError::Deserialization(err.to_string())
        } else {
            ProtocolError::Serialization(err.to_string())
        }
    }
}
