//! Error types for bandchain core.

use thiserror::Error;

use crate::crypto::PublicKey;
use crate::types::BlockHash;

/// Core errors from key handling and block encoding.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("malformed block: {0}")]
    MalformedBlock(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}

/// Structural problems with a single block, independent of chain context.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("requester signature missing")]
    MissingRequesterSignature,

    #[error("requester signature verification failed")]
    RequesterSignatureFailed,

    #[error("responder signature verification failed")]
    ResponderSignatureFailed,

    #[error("invalid public key for {0}")]
    InvalidPublicKey(&'static str),

    #[error("requester and responder are the same identity")]
    SelfInteraction,

    #[error("sequence number {got} is below genesis for {role}")]
    InvalidSequence { role: &'static str, got: u64 },

    #[error("responder half is assigned but not signed")]
    UnsignedResponderHalf,

    #[error("responder signed an unassigned half")]
    UnassignedResponderHalf,
}

/// A block does not extend its chain predecessor for a given identity.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("{identity} does not take part in this block")]
    NotParticipant { identity: PublicKey },

    #[error("sequence gap: expected {expected}, got {got}")]
    SequenceGap { expected: u64, got: u64 },

    #[error("previous hash mismatch: expected {expected}, got {got}")]
    HashMismatch { expected: BlockHash, got: BlockHash },

    #[error("total mismatch: expected ({expected_up}, {expected_down}), got ({got_up}, {got_down})")]
    TotalMismatch {
        expected_up: u64,
        expected_down: u64,
        got_up: u64,
        got_down: u64,
    },
}
