//! Structural validation of a single block: keys, signatures, shape.
//!
//! Chain context (sequence, previous hash, totals) is checked separately by
//! [`Block::validate_against`](crate::Block::validate_against).

use crate::block::Block;
use crate::error::ValidationError;
use crate::types::{GENESIS_SEQ, UNKNOWN_SEQ};

/// Validate a block as received from the network.
///
/// This performs:
/// - Public key checks for both participants
/// - Requester signature verification over the request bytes
/// - Responder signature verification over the full encoding, if present
/// - Sequence numbers at or above genesis where assigned
pub fn validate_block(block: &Block) -> Result<(), ValidationError> {
    validate_block_structure(block)?;

    let sig = block
        .signature_requester
        .as_ref()
        .ok_or(ValidationError::MissingRequesterSignature)?;
    block
        .public_key_requester
        .verify(&block.request_bytes(), sig)
        .map_err(|_| ValidationError::RequesterSignatureFailed)?;

    if let Some(sig) = &block.signature_responder {
        block
            .public_key_responder
            .verify(&block.canonical_encode(), sig)
            .map_err(|_| ValidationError::ResponderSignatureFailed)?;
    }

    Ok(())
}

/// Validate block shape without signature verification.
pub fn validate_block_structure(block: &Block) -> Result<(), ValidationError> {
    if !block.public_key_requester.is_valid() {
        return Err(ValidationError::InvalidPublicKey("requester"));
    }
    if !block.public_key_responder.is_valid() {
        return Err(ValidationError::InvalidPublicKey("responder"));
    }
    if block.public_key_requester == block.public_key_responder {
        return Err(ValidationError::SelfInteraction);
    }
    if block.sequence_number_requester < GENESIS_SEQ {
        return Err(ValidationError::InvalidSequence {
            role: "requester",
            got: block.sequence_number_requester,
        });
    }

    match (block.sequence_number_responder, &block.signature_responder) {
        (UNKNOWN_SEQ, Some(_)) => Err(ValidationError::UnassignedResponderHalf),
        (UNKNOWN_SEQ, None) => Ok(()),
        (_, None) => Err(ValidationError::UnsignedResponderHalf),
        (_, Some(_)) => Ok(()),
    }
}
