//! Golden test vectors for deterministic verification.
//!
//! Each vector fixes the seeds and amounts of one signing round. The block
//! built from it must encode, sign and hash identically on every build.

use serde::Serialize;

use bandchain_core::{canonical_block_bytes, Block, Keypair, GENESIS_ID, GENESIS_SEQ};

/// A golden test vector.
#[derive(Debug, Clone)]
pub struct GoldenVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    /// Seed of the requester keypair.
    pub requester_seed: [u8; 32],
    /// Seed of the responder keypair.
    pub responder_seed: [u8; 32],
    pub up: u64,
    pub down: u64,
    /// Leave the responder half unassigned.
    pub half_signed: bool,
    /// Expected block hash (hex). Empty until pinned.
    pub expected_hash: &'static str,
}

/// Everything derived from a vector, in hex.
#[derive(Debug, Clone, Serialize)]
pub struct VectorOutput {
    pub name: String,
    pub requester: String,
    pub responder: String,
    pub canonical_bytes: String,
    pub request_bytes: String,
    pub signature_requester: Option<String>,
    pub signature_responder: Option<String>,
    pub block_hash: String,
}

/// Get all golden test vectors.
pub fn all_vectors() -> Vec<GoldenVector> {
    vec![
        GoldenVector {
            name: "genesis round, ten up five down",
            requester_seed: [0x42; 32],
            responder_seed: [0x43; 32],
            up: 10,
            down: 5,
            half_signed: false,
            expected_hash: "",
        },
        GoldenVector {
            name: "genesis request awaiting countersignature",
            requester_seed: [0x42; 32],
            responder_seed: [0x43; 32],
            up: 10,
            down: 5,
            half_signed: true,
            expected_hash: "",
        },
        GoldenVector {
            name: "empty interaction",
            requester_seed: [0x00; 32],
            responder_seed: [0x01; 32],
            up: 0,
            down: 0,
            half_signed: false,
            expected_hash: "",
        },
        GoldenVector {
            name: "multi-byte integer encodings",
            requester_seed: [0x10; 32],
            responder_seed: [0x20; 32],
            up: 70_000,
            down: 5_000_000_000,
            half_signed: false,
            expected_hash: "",
        },
    ]
}

/// Build the genesis block described by a vector.
pub fn block_from_vector(vector: &GoldenVector) -> Block {
    let requester = Keypair::from_seed(&vector.requester_seed);
    let responder = Keypair::from_seed(&vector.responder_seed);

    let mut block = Block::create(None, requester.public_key(), responder.public_key())
        .with_interaction(vector.up, vector.down);
    block.sign_as_requester(&requester);

    if vector.half_signed {
        block
    } else {
        block.countersign(None, &responder)
    }
}

/// Derive every output of a vector.
pub fn vector_output(vector: &GoldenVector) -> VectorOutput {
    let block = block_from_vector(vector);
    VectorOutput {
        name: vector.name.to_string(),
        requester: block.public_key_requester.to_hex(),
        responder: block.public_key_responder.to_hex(),
        canonical_bytes: hex::encode(canonical_block_bytes(&block)),
        request_bytes: hex::encode(block.request_bytes()),
        signature_requester: block.signature_requester.map(|s| s.to_hex()),
        signature_responder: block.signature_responder.map(|s| s.to_hex()),
        block_hash: block.compute_hash().to_hex(),
    }
}

/// All vector outputs as pretty JSON, for pinning or for other
/// implementations to check against.
pub fn export_json() -> serde_json::Result<String> {
    let outputs: Vec<VectorOutput> = all_vectors().iter().map(vector_output).collect();
    serde_json::to_string_pretty(&outputs)
}

/// Verify all golden vectors produce the pinned hashes.
///
/// Returns `(name, matches, actual hash)` per vector; an unpinned vector
/// always matches.
pub fn verify_all_vectors() -> Vec<(String, bool, String)> {
    all_vectors()
        .iter()
        .map(|v| {
            let hash = block_from_vector(v).compute_hash().to_hex();
            let matches = v.expected_hash.is_empty() || hash == v.expected_hash;
            (v.name.to_string(), matches, hash)
        })
        .collect()
}

/// Structural properties every vector block has regardless of pinning.
pub fn check_vector_shape(vector: &GoldenVector) -> Result<(), String> {
    let block = block_from_vector(vector);
    bandchain_core::validate_block(&block).map_err(|e| e.to_string())?;

    if block.sequence_number_requester != GENESIS_SEQ || block.previous_hash_requester != GENESIS_ID {
        return Err("requester half is not at genesis".into());
    }
    if (block.total_up_requester, block.total_down_requester) != (vector.up, vector.down) {
        return Err("requester totals do not match the interaction".into());
    }
    if !vector.half_signed
        && (block.total_up_responder, block.total_down_responder) != (vector.down, vector.up)
    {
        return Err("responder totals are not the reversed interaction".into());
    }
    Ok(())
}
