//! Convergence checks between two replicas of a chain.
//!
//! After crawling, two stores can compare what they hold for an identity
//! by a digest over the ordered block hashes, or block by block to find where
//! they part ways.

use std::collections::BTreeMap;

use bandchain_core::{BlockHash, PublicKey, UNKNOWN_SEQ};
use bandchain_store::LedgerStore;

use crate::error::Result;

/// Deterministic digest of the chain of `identity` as held by `store`.
///
/// Algorithm: Blake3 over a domain prefix, the identity, and the hash of
/// every block in sequence order. `None` if the store holds no blocks for
/// `identity`.
pub async fn compute_chain_digest<S: LedgerStore + ?Sized>(
    store: &S,
    identity: &PublicKey,
) -> Result<Option<BlockHash>> {
    let blocks = store.get_blocks_since(identity, UNKNOWN_SEQ).await?;
    if blocks.is_empty() {
        return Ok(None);
    }

    let mut hasher = blake3::Hasher::new();
    hasher.update(b"bandchain-chain-v1:");
    hasher.update(identity.as_bytes());
    for block in &blocks {
        hasher.update(block.compute_hash().as_bytes());
    }

    Ok(Some(BlockHash::from_bytes(*hasher.finalize().as_bytes())))
}

/// Result of convergence verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceResult {
    /// Both stores hold the same blocks at the same positions.
    Converged,
    /// One side is missing blocks the other has (may need another crawl).
    NotConverged { reason: String },
    /// The two sides hold different blocks at the same position.
    Diverged {
        at_seq: u64,
        local_hash: BlockHash,
        remote_hash: BlockHash,
    },
}

impl ConvergenceResult {
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceResult::Converged)
    }

    pub fn is_diverged(&self) -> bool {
        matches!(self, ConvergenceResult::Diverged { .. })
    }
}

/// Compare the chain of `identity` in `local` against `remote`.
pub async fn verify_convergence<L, R>(
    local: &L,
    remote: &R,
    identity: &PublicKey,
) -> Result<ConvergenceResult>
where
    L: LedgerStore + ?Sized,
    R: LedgerStore + ?Sized,
{
    let local_chain = positions(local, identity).await?;
    let remote_chain = positions(remote, identity).await?;

    if local_chain.is_empty() && remote_chain.is_empty() {
        return Ok(ConvergenceResult::NotConverged {
            reason: format!("no blocks for {} on either side", identity),
        });
    }

    let mut missing_local = 0usize;
    let mut missing_remote = 0usize;

    for (seq, local_hash) in &local_chain {
        match remote_chain.get(seq) {
            Some(remote_hash) if remote_hash != local_hash => {
                return Ok(ConvergenceResult::Diverged {
                    at_seq: *seq,
                    local_hash: *local_hash,
                    remote_hash: *remote_hash,
                });
            }
            Some(_) => {}
            None => missing_remote += 1,
        }
    }
    for seq in remote_chain.keys() {
        if !local_chain.contains_key(seq) {
            missing_local += 1;
        }
    }

    if missing_local > 0 || missing_remote > 0 {
        return Ok(ConvergenceResult::NotConverged {
            reason: format!(
                "{} blocks missing locally, {} missing remotely",
                missing_local, missing_remote
            ),
        });
    }

    Ok(ConvergenceResult::Converged)
}

async fn positions<S: LedgerStore + ?Sized>(
    store: &S,
    identity: &PublicKey,
) -> Result<BTreeMap<u64, BlockHash>> {
    Ok(store
        .get_blocks_since(identity, UNKNOWN_SEQ)
        .await?
        .iter()
        .filter_map(|b| Some((b.sequence_number_for(identity)?, b.compute_hash())))
        .collect())
}
