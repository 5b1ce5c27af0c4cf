//! Error types for the sync engine.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
///
/// A conflict is never an error; it is a per-item outcome.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Bad or missing API key, unregistered or inactive node.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Missing or invalid local settings. Raised before any network call.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Timeout, DNS failure, refused connection.
    #[error("connectivity error: {message}")]
    Connectivity {
        /// Error message.
        message: String,
        /// Whether the next pass may retry.
        retryable: bool,
    },

    /// Non-2xx status, unparseable body or an application error body.
    #[error("protocol error: {message}")]
    Protocol {
        /// HTTP status, when one was received.
        status: Option<u16>,
        /// Error message.
        message: String,
    },

    /// A payload that cannot be applied.
    #[error("validation error: {0}")]
    Validation(String),

    /// Local persistence error.
    #[error("storage error: {0}")]
    Storage(#[from] syncq_core::CoreError),
}

impl SyncError {
    /// Creates a retryable connectivity error.
    pub fn connectivity(message: impl Into<String>) -> Self {
        Self::Connectivity {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a protocol error without an HTTP status.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            status: None,
            message: message.into(),
        }
    }

    /// Creates a protocol error for an HTTP status.
    pub fn http_status(status: u16, message: impl Into<String>) -> Self {
        Self::Protocol {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Returns true if the next pass may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Connectivity { retryable: true, .. })
    }

    /// Short class name used in logs and summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Authentication(_) => "authentication",
            SyncError::Configuration(_) => "configuration",
            SyncError::Connectivity { .. } => "connectivity",
            SyncError::Protocol { .. } => "protocol",
            SyncError::Validation(_) => "validation",
            SyncError::Storage(_) => "storage",
        }
    }
}

impl From<syncq_sync_protocol::ProtocolError> for SyncError {
    fn from(e: syncq_sync_protocol::ProtocolError) -> Self {
        SyncError::protocol(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::connectivity("connection refused").is_retryable());
        assert!(!SyncError::Connectivity {
            message: "bad certificate".into(),
            retryable: false
        }
        .is_retryable());
        assert!(!SyncError::http_status(500, "boom").is_retryable());
        assert!(!SyncError::Authentication("Invalid API key".into()).is_retryable());
    }

    #[test]
    fn error_display() {
        let err = SyncError::http_status(503, "unavailable");
        assert_eq!(err.to_string(), "protocol error: unavailable");
        assert_eq!(err.kind(), "protocol");
        assert_eq!(
            SyncError::Configuration("node id is not configured".into()).to_string(),
            "configuration error: node id is not configured"
        );
    }
}
