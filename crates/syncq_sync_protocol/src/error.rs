//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding or decoding protocol messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A message could not be serialized.
    #[error("encode error: {0}")]
    Encode(String),

    /// A message body was not valid for the expected type.
    #[error("decode error: {0}")]
    Decode(String),
}

impl ProtocolError {
    pub(crate) fn decode(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }

    pub(crate) fn encode(err: serde_json::Error) -> Self {
        Self::Encode(err.to_string())
    }
}
