//! # Bandchain Core
//!
//! Pure primitives for bandchain: blocks, hash chains, and canonical encoding.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`Block`] - One two-party interaction, signed by both sides
//! - [`BlockHash`] - Blake3 identity of a block, chained through `previous_hash_*`
//! - [`PublicKey`] / [`Keypair`] - Ed25519 identities
//! - [`Totals`] - Cumulative up/down counters
//!
//! ## Chains
//!
//! Every identity owns a chain ordered by sequence number. The first block
//! has [`GENESIS_SEQ`] and [`GENESIS_ID`] as its previous hash; every later
//! block points at the hash of its predecessor and advances the totals by
//! the interaction, oriented by the identity's role.

pub mod block;
pub mod canonical;
pub mod crypto;
pub mod error;
pub mod types;
pub mod validation;

pub use block::{Block, Role};
pub use canonical::{canonical_block_bytes, decode_block_fields};
pub use crypto::{hash_bytes, Keypair, PublicKey, Signature};
pub use error::{ChainError, CoreError, ValidationError};
pub use types::{BlockHash, Totals, GENESIS_ID, GENESIS_SEQ, UNKNOWN_SEQ};
pub use validation::{validate_block, validate_block_structure};
