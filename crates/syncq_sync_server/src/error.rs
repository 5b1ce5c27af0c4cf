//! Error types for the sync server.

use syncq_sync_protocol::ErrorBody;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format or content.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Missing or wrong credentials, or an unknown node.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The node is known but not allowed to sync.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// Hub sync is switched off.
    #[error("hub sync is disabled")]
    Disabled,

    /// A requested artifact does not exist.
    #[error("artifact not found: {0}")]
    ArtifactNotFound(String),

    /// Node not found in the registry.
    #[error("unknown node: {0}")]
    UnknownNode(String),

    /// Durable state error.
    #[error("storage error: {0}")]
    Storage(#[from] syncq_core::CoreError),

    /// Protocol encoding error.
    #[error("protocol error: {0}")]
    Protocol(#[from] syncq_sync_protocol::ProtocolError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_)
                | ServerError::AuthenticationFailed(_)
                | ServerError::NotAuthorized(_)
                | ServerError::Disabled
                | ServerError::ArtifactNotFound(_)
                | ServerError::UnknownNode(_)
        )
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            ServerError::Storage(_)
                | ServerError::Protocol(_)
                | ServerError::Internal(_)
                | ServerError::Io(_)
        )
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::InvalidRequest(_) => 400,
            ServerError::AuthenticationFailed(_) | ServerError::UnknownNode(_) => 401,
            ServerError::NotAuthorized(_) | ServerError::Disabled => 403,
            ServerError::ArtifactNotFound(_) => 404,
            ServerError::Storage(_)
            | ServerError::Protocol(_)
            | ServerError::Internal(_)
            | ServerError::Io(_) => 500,
        }
    }

    /// Stable machine-readable code.
    pub fn error_code(&self) -> &'static str {
        match self {
            ServerError::InvalidRequest(_) => "invalidrequest",
            ServerError::AuthenticationFailed(_) => "invalidapikey",
            ServerError::UnknownNode(_) => "nodenotregistered",
            ServerError::NotAuthorized(_) => "nodenotactive",
            ServerError::Disabled => "syncdisabled",
            ServerError::ArtifactNotFound(_) => "artifactnotfound",
            ServerError::Storage(_)
            | ServerError::Protocol(_)
            | ServerError::Internal(_)
            | ServerError::Io(_) => "internalerror",
        }
    }

    /// JSON body sent to the client.
    ///
    /// Internal details are not leaked; server errors carry a generic message.
    pub fn to_body(&self) -> ErrorBody {
        let message = if self.is_server_error() {
            "internal server error".to_string()
        } else {
            self.to_string()
        };
        ErrorBody::new(self.error_code(), message)
    }
}
