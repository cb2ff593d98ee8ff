//! Error types for the node.

use bandchain_protocol::ProtocolError;
use bandchain_store::StoreError;
use thiserror::Error;

/// Errors that can occur while running a node.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Protocol or transport error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A transfer event of a kind the accounting adapter does not know.
    #[error("unknown transfer kind: {0}")]
    UnknownTransferKind(String),
}

impl NodeError {
    /// Errors that stop the event loop instead of being logged and skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(self, NodeError::UnknownTransferKind(_))
    }
}

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
