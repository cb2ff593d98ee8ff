//! Canonical CBOR encoding for blocks.
//!
//! Blocks are encoded as a CBOR map with small integer keys, following the
//! RFC 8949 core deterministic rules:
//! - Map keys sorted by encoded byte comparison
//! - Integers use the smallest valid encoding
//! - Definite lengths only
//!
//! Every field except the signatures and the local insert time takes part.
//! The same block therefore produces identical bytes, and an identical hash,
//! on every peer.

use ciborium::value::Value;

use crate::block::Block;
use crate::crypto::{hash_bytes, PublicKey};
use crate::error::CoreError;
use crate::types::BlockHash;

/// Map keys. Keys 0-23 encode as single bytes.
mod keys {
    pub const PUBLIC_KEY_REQUESTER: u64 = 0;
    pub const PUBLIC_KEY_RESPONDER: u64 = 1;
    pub const UP: u64 = 2;
    pub const DOWN: u64 = 3;
    pub const TOTAL_UP_REQUESTER: u64 = 4;
    pub const TOTAL_DOWN_REQUESTER: u64 = 5;
    pub const TOTAL_UP_RESPONDER: u64 = 6;
    pub const TOTAL_DOWN_RESPONDER: u64 = 7;
    pub const SEQUENCE_NUMBER_REQUESTER: u64 = 8;
    pub const SEQUENCE_NUMBER_RESPONDER: u64 = 9;
    pub const PREVIOUS_HASH_REQUESTER: u64 = 10;
    pub const PREVIOUS_HASH_RESPONDER: u64 = 11;
}

/// Number of entries in an encoded block map.
const FIELD_COUNT: usize = 12;

enum Field<'a> {
    Uint(u64),
    Bytes(&'a [u8]),
}

/// Encode the signable fields of a block to canonical CBOR bytes.
pub fn canonical_block_bytes(block: &Block) -> Vec<u8> {
    let entries: [(u64, Field<'_>); FIELD_COUNT] = [
        (keys::PUBLIC_KEY_REQUESTER, Field::Bytes(block.public_key_requester.as_bytes())),
        (keys::PUBLIC_KEY_RESPONDER, Field::Bytes(block.public_key_responder.as_bytes())),
        (keys::UP, Field::Uint(block.up)),
        (keys::DOWN, Field::Uint(block.down)),
        (keys::TOTAL_UP_REQUESTER, Field::Uint(block.total_up_requester)),
        (keys::TOTAL_DOWN_REQUESTER, Field::Uint(block.total_down_requester)),
        (keys::TOTAL_UP_RESPONDER, Field::Uint(block.total_up_responder)),
        (keys::TOTAL_DOWN_RESPONDER, Field::Uint(block.total_down_responder)),
        (keys::SEQUENCE_NUMBER_REQUESTER, Field::Uint(block.sequence_number_requester)),
        (keys::SEQUENCE_NUMBER_RESPONDER, Field::Uint(block.sequence_number_responder)),
        (keys::PREVIOUS_HASH_REQUESTER, Field::Bytes(block.previous_hash_requester.as_bytes())),
        (keys::PREVIOUS_HASH_RESPONDER, Field::Bytes(block.previous_hash_responder.as_bytes())),
    ];

    let mut buf = Vec::with_capacity(256);
    encode_map_canonical(&mut buf, &entries);
    buf
}

/// Hash preimage: canonical bytes followed by every present signature.
pub fn hash_input(block: &Block) -> Vec<u8> {
    let mut buf = canonical_block_bytes(block);
    if let Some(sig) = &block.signature_requester {
        buf.extend_from_slice(sig.as_bytes());
    }
    if let Some(sig) = &block.signature_responder {
        buf.extend_from_slice(sig.as_bytes());
    }
    buf
}

/// Compute the hash of a block.
pub fn block_hash(block: &Block) -> BlockHash {
    hash_bytes(&hash_input(block))
}

/// Encode an unsigned integer with the given major type.
fn encode_uint(buf: &mut Vec<u8>, major: u8, n: u64) {
    let mt = major << 5;
    if n < 24 {
        buf.push(mt | (n as u8));
    } else if n <= 0xff {
        buf.push(mt | 24);
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(mt | 25);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

fn encode_field(buf: &mut Vec<u8>, field: &Field<'_>) {
    match field {
        Field::Uint(n) => encode_uint(buf, 0, *n),
        Field::Bytes(b) => {
            encode_uint(buf, 2, b.len() as u64);
            buf.extend_from_slice(b);
        }
    }
}

/// Encode a map (major type 5) with keys sorted by their encoded bytes.
fn encode_map_canonical(buf: &mut Vec<u8>, entries: &[(u64, Field<'_>)]) {
    let mut pairs: Vec<(Vec<u8>, &Field<'_>)> = entries
        .iter()
        .map(|(k, v)| {
            let mut key_buf = Vec::with_capacity(1);
            encode_uint(&mut key_buf, 0, *k);
            (key_buf, v)
        })
        .collect();

    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    encode_uint(buf, 5, pairs.len() as u64);
    for (key_bytes, value) in pairs {
        buf.extend_from_slice(&key_bytes);
        encode_field(buf, value);
    }
}

/// Rebuild the signable fields of a block from canonical bytes.
///
/// Signatures and insert time are not part of the encoding and come back
/// empty.
pub fn decode_block_fields(bytes: &[u8]) -> Result<Block, CoreError> {
    let value: Value =
        ciborium::from_reader(bytes).map_err(|e| CoreError::DecodingError(e.to_string()))?;

    let map = match value {
        Value::Map(m) => m,
        _ => return Err(CoreError::MalformedBlock("expected map".into())),
    };
    if map.len() != FIELD_COUNT {
        return Err(CoreError::MalformedBlock(format!(
            "expected {} fields, got {}",
            FIELD_COUNT,
            map.len()
        )));
    }

    let get = |key: u64| -> Result<&Value, CoreError> {
        map.iter()
            .find(|(k, _)| matches!(k, Value::Integer(i) if i128::from(*i) == key as i128))
            .map(|(_, v)| v)
            .ok_or_else(|| CoreError::MalformedBlock(format!("missing key {}", key)))
    };

    let uint = |key: u64| -> Result<u64, CoreError> {
        match get(key)? {
            Value::Integer(i) => u64::try_from(*i)
                .map_err(|_| CoreError::MalformedBlock(format!("key {} out of range", key))),
            _ => Err(CoreError::MalformedBlock(format!("key {} is not an integer", key))),
        }
    };

    let bytes32 = |key: u64| -> Result<[u8; 32], CoreError> {
        match get(key)? {
            Value::Bytes(b) => b
                .as_slice()
                .try_into()
                .map_err(|_| CoreError::MalformedBlock(format!("key {} has wrong length", key))),
            _ => Err(CoreError::MalformedBlock(format!("key {} is not bytes", key))),
        }
    };

    Ok(Block {
        public_key_requester: PublicKey(bytes32(keys::PUBLIC_KEY_REQUESTER)?),
        public_key_responder: PublicKey(bytes32(keys::PUBLIC_KEY_RESPONDER)?),
        up: uint(keys::UP)?,
        down: uint(keys::DOWN)?,
        total_up_requester: uint(keys::TOTAL_UP_REQUESTER)?,
        total_down_requester: uint(keys::TOTAL_DOWN_REQUESTER)?,
        total_up_responder: uint(keys::TOTAL_UP_RESPONDER)?,
        total_down_responder: uint(keys::TOTAL_DOWN_RESPONDER)?,
        sequence_number_requester: uint(keys::SEQUENCE_NUMBER_REQUESTER)?,
        sequence_number_responder: uint(keys::SEQUENCE_NUMBER_RESPONDER)?,
        previous_hash_requester: BlockHash(bytes32(keys::PREVIOUS_HASH_REQUESTER)?),
        previous_hash_responder: BlockHash(bytes32(keys::PREVIOUS_HASH_RESPONDER)?),
        signature_requester: None,
        signature_responder: None,
        insert_time: None,
    })
}
