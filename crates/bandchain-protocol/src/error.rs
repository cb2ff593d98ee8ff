//! Error types for the protocol crate.

use thiserror::Error;

use bandchain_core::{BlockHash, PublicKey};

/// Errors raised while exchanging signatures, crawling or moving messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A message could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// Encoded message exceeds the wire limit.
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// Transport-level error.
    #[error("transport error: {0}")]
    TransportError(String),

    /// Peer is not reachable through the transport.
    #[error("peer not connected: {0}")]
    PeerNotConnected(PublicKey),

    /// Store operation failed.
    #[error("store error: {0}")]
    StoreError(#[from] bandchain_store::StoreError),

    /// A block failed structural validation.
    #[error("validation error: {0}")]
    ValidationError(#[from] bandchain_core::ValidationError),

    /// A signature request is already waiting for its response.
    #[error("signature exchange with {peer} still outstanding")]
    ExchangeInProgress { peer: PublicKey },

    /// A signature request names somebody else as responder, or is already answered.
    #[error("unexpected signature request: {0}")]
    UnexpectedRequest(String),

    /// A freshly signed block collides with a stored one.
    #[error("chain position already taken by {existing}")]
    Conflict { existing: BlockHash },
}

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
