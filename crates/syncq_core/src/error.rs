//! Error types for syncq core.

use crate::types::ItemId;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] syncq_storage::StorageError),

    /// Protocol encoding error.
    #[error("protocol error: {0}")]
    Protocol(#[from] syncq_sync_protocol::ProtocolError),

    /// A journal record could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Another process holds the data directory.
    #[error("data directory locked: another process has exclusive access")]
    DirectoryLocked,

    /// The data directory is missing or not a directory.
    #[error("invalid data directory: {0}")]
    InvalidDirectory(String),

    /// No queue item with this id.
    #[error("queue item not found: {0}")]
    ItemNotFound(ItemId),

    /// The item is not in a state that allows the requested transition.
    #[error("invalid transition for item {id}: {from} -> {to}")]
    InvalidTransition {
        /// The item.
        id: ItemId,
        /// Its current status.
        from: String,
        /// The requested status.
        to: String,
    },
}

impl CoreError {
    pub(crate) fn codec(message: impl ToString) -> Self {
        Self::Codec(message.to_string())
    }
}
