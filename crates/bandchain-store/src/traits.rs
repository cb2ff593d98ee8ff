//! LedgerStore trait: the abstract interface for block persistence.
//!
//! Implementations include SQLite (primary) and in-memory (for tests).
//!
//! Every block is kept once per chain it belongs to. A fully signed block
//! therefore appears in both the requester's and the responder's chain, while
//! a half-signed block appears in the requester's chain only.

use async_trait::async_trait;
use serde::Serialize;

use bandchain_core::{Block, BlockHash, ChainError, PublicKey, Totals, UNKNOWN_SEQ};

use crate::error::{Result, StoreError};

/// Result of adding a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertResult {
    /// The block was new.
    Inserted,
    /// The block replaced the requester's half-signed version of itself.
    Completed,
    /// The exact same block is already stored (idempotent, not an error).
    AlreadyExists,
    /// A different block occupies one of this block's chain positions.
    Conflict {
        /// Hash of the block at that position.
        existing: BlockHash,
    },
}

impl InsertResult {
    /// True if the store changed.
    pub fn is_stored(&self) -> bool {
        matches!(self, InsertResult::Inserted | InsertResult::Completed)
    }
}

/// Interaction summary between the local identity and one counterparty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrustEdge {
    pub counterparty: PublicKey,
    pub block_count: u64,
    /// Insert time of the most recent block with this counterparty.
    pub last_block_time: Option<i64>,
}

/// The LedgerStore trait: async interface for block persistence.
///
/// For SQLite, `spawn_blocking` is used internally to avoid blocking the
/// runtime, and all writes go through one connection.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a block to every chain it belongs to.
    ///
    /// # Returns
    /// - `Inserted` if the block was new.
    /// - `Completed` if it fully signs a stored half-signed block, matched on
    ///   requester key, requester sequence number and requester previous hash.
    /// - `AlreadyExists` if the same hash is already stored.
    /// - `Conflict` if another block holds one of its positions. Nothing is
    ///   written in that case, and a fully signed block is never replaced.
    async fn add_block(&self, block: &Block) -> Result<InsertResult>;

    // ─────────────────────────────────────────────────────────────────────────
    // Lookups
    // ─────────────────────────────────────────────────────────────────────────

    /// Check if any chain holds a block with this hash.
    async fn contains(&self, hash: &BlockHash) -> Result<bool>;

    /// Get a block by hash.
    async fn get_block(&self, hash: &BlockHash) -> Result<Option<Block>>;

    /// Highest sequence number block in the chain of `identity`.
    async fn get_latest(&self, identity: &PublicKey) -> Result<Option<Block>>;

    async fn get_by_identity_and_sequence_number(
        &self,
        identity: &PublicKey,
        sequence_number: u64,
    ) -> Result<Option<Block>>;

    /// Blocks with `sequence_number >= seq`, ascending.
    async fn get_blocks_since(&self, identity: &PublicKey, seq: u64) -> Result<Vec<Block>>;

    /// Blocks with `sequence_number <= seq`, ascending.
    async fn get_blocks_until(&self, identity: &PublicKey, seq: u64) -> Result<Vec<Block>>;

    /// The block preceding `block` in the chain of `identity`.
    async fn get_block_before(&self, block: &Block, identity: &PublicKey)
        -> Result<Option<Block>>;

    /// The block following `block` in the chain of `identity`.
    async fn get_block_after(&self, block: &Block, identity: &PublicKey)
        -> Result<Option<Block>>;

    /// The copy of `block` stored in the chain of the other participant.
    async fn get_linked(&self, block: &Block, identity: &PublicKey) -> Result<Option<Block>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Reporting
    // ─────────────────────────────────────────────────────────────────────────

    /// The `limit` most recent blocks of `identity`, newest first.
    async fn get_recent_blocks(&self, identity: &PublicKey, limit: usize) -> Result<Vec<Block>>;

    /// Number of blocks in the chain of `identity`.
    async fn count_blocks(&self, identity: &PublicKey) -> Result<u64>;

    /// Number of stored chain entries across all identities.
    async fn total_block_count(&self) -> Result<u64>;

    /// Counterparties of `identity` with their block counts.
    async fn get_trust_edges(&self, identity: &PublicKey) -> Result<Vec<TrustEdge>>;
}

/// Extension trait for queries derived from the core lookups.
pub trait LedgerStoreExt: LedgerStore {
    /// Hash of the latest block of `identity`.
    fn get_latest_hash(
        &self,
        identity: &PublicKey,
    ) -> impl std::future::Future<Output = Result<Option<BlockHash>>> + Send;

    /// Latest sequence number of `identity`, or [`UNKNOWN_SEQ`] if none.
    fn get_latest_sequence_number(
        &self,
        identity: &PublicKey,
    ) -> impl std::future::Future<Output = Result<u64>> + Send;

    /// Current totals of `identity`; `None` if it has no blocks yet.
    fn get_total(
        &self,
        identity: &PublicKey,
    ) -> impl std::future::Future<Output = Result<Option<Totals>>> + Send;

    /// Build the requester shell of the next block of `requester`.
    fn create_block(
        &self,
        requester: &PublicKey,
        responder: &PublicKey,
    ) -> impl std::future::Future<Output = Result<Block>> + Send;

    /// Walk the chain of `identity` and report every link that does not hold.
    fn verify_chain(
        &self,
        identity: &PublicKey,
    ) -> impl std::future::Future<Output = Result<Vec<(u64, ChainError)>>> + Send;
}

impl<S: LedgerStore + ?Sized> LedgerStoreExt for S {
    async fn get_latest_hash(&self, identity: &PublicKey) -> Result<Option<BlockHash>> {
        Ok(self.get_latest(identity).await?.map(|b| b.compute_hash()))
    }

    async fn get_latest_sequence_number(&self, identity: &PublicKey) -> Result<u64> {
        Ok(self
            .get_latest(identity)
            .await?
            .and_then(|b| b.sequence_number_for(identity))
            .unwrap_or(UNKNOWN_SEQ))
    }

    async fn get_total(&self, identity: &PublicKey) -> Result<Option<Totals>> {
        Ok(self
            .get_latest(identity)
            .await?
            .and_then(|b| b.totals_for(identity)))
    }

    async fn create_block(&self, requester: &PublicKey, responder: &PublicKey) -> Result<Block> {
        let latest = self.get_latest(requester).await?;
        Ok(Block::create(latest.as_ref(), *requester, *responder))
    }

    async fn verify_chain(&self, identity: &PublicKey) -> Result<Vec<(u64, ChainError)>> {
        let blocks = self.get_blocks_since(identity, UNKNOWN_SEQ).await?;
        let mut violations = Vec::new();
        let mut previous: Option<&Block> = None;

        for block in &blocks {
            if let Err(e) = block.validate_against(previous, identity) {
                let seq = block.sequence_number_for(identity).unwrap_or(UNKNOWN_SEQ);
                violations.push((seq, e));
            }
            previous = Some(block);
        }

        Ok(violations)
    }
}

/// What adding a block means for one of its chain positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotAction {
    Insert,
    Replace,
    Keep,
    Conflict(BlockHash),
}

/// Decide how `incoming` (with hash `hash`) lands on a position currently
/// holding `existing`.
pub(crate) fn resolve_slot(incoming: &Block, hash: &BlockHash, existing: Option<&Block>) -> SlotAction {
    let Some(existing) = existing else {
        return SlotAction::Insert;
    };

    let existing_hash = existing.compute_hash();
    if existing_hash == *hash {
        return SlotAction::Keep;
    }

    let completes = existing.signature_responder.is_none()
        && incoming.signature_responder.is_some()
        && existing.public_key_requester == incoming.public_key_requester
        && existing.sequence_number_requester == incoming.sequence_number_requester
        && existing.previous_hash_requester == incoming.previous_hash_requester;

    if completes {
        SlotAction::Replace
    } else {
        SlotAction::Conflict(existing_hash)
    }
}

/// Combine per-position actions into one result.
pub(crate) fn summarize(actions: &[SlotAction]) -> InsertResult {
    if actions.contains(&SlotAction::Replace) {
        InsertResult::Completed
    } else if actions.contains(&SlotAction::Insert) {
        InsertResult::Inserted
    } else {
        InsertResult::AlreadyExists
    }
}

/// Reject counters SQLite cannot hold, so every store accepts the same blocks.
pub(crate) fn check_storable(block: &Block) -> Result<()> {
    let fields = [
        ("up", block.up),
        ("down", block.down),
        ("total_up_requester", block.total_up_requester),
        ("total_down_requester", block.total_down_requester),
        ("total_up_responder", block.total_up_responder),
        ("total_down_responder", block.total_down_responder),
        ("sequence_number_requester", block.sequence_number_requester),
        ("sequence_number_responder", block.sequence_number_responder),
    ];
    match fields.iter().find(|(_, value)| i64::try_from(*value).is_err()) {
        Some((field, value)) => Err(StoreError::InvalidData(format!(
            "{} {} exceeds storable range",
            field, value
        ))),
        None => Ok(()),
    }
}

/// Current time in Unix milliseconds.
pub(crate) fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bandchain_core::Keypair;

    fn request(a: &Keypair, b: &Keypair) -> Block {
        let mut block = Block::create(None, a.public_key(), b.public_key()).with_interaction(10, 5);
        block.sign_as_requester(a);
        block
    }

    #[test]
    fn test_resolve_empty_slot() {
        let (a, b) = (Keypair::from_seed(&[1; 32]), Keypair::from_seed(&[2; 32]));
        let half = request(&a, &b);
        assert_eq!(resolve_slot(&half, &half.compute_hash(), None), SlotAction::Insert);
    }

    #[test]
    fn test_resolve_completion() {
        let (a, b) = (Keypair::from_seed(&[1; 32]), Keypair::from_seed(&[2; 32]));
        let half = request(&a, &b);
        let full = half.countersign(None, &b);

        assert_eq!(resolve_slot(&full, &full.compute_hash(), Some(&half)), SlotAction::Replace);
        assert_eq!(resolve_slot(&full, &full.compute_hash(), Some(&full)), SlotAction::Keep);
    }

    #[test]
    fn test_resolve_never_overwrites_full_block() {
        let (a, b) = (Keypair::from_seed(&[1; 32]), Keypair::from_seed(&[2; 32]));
        let half = request(&a, &b);
        let full = half.countersign(None, &b);

        assert!(matches!(
            resolve_slot(&half, &half.compute_hash(), Some(&full)),
            SlotAction::Conflict(h) if h == full.compute_hash()
        ));
    }

    #[test]
    fn test_summarize() {
        assert_eq!(summarize(&[SlotAction::Keep, SlotAction::Keep]), InsertResult::AlreadyExists);
        assert_eq!(summarize(&[SlotAction::Keep, SlotAction::Insert]), InsertResult::Inserted);
        assert_eq!(summarize(&[SlotAction::Replace, SlotAction::Insert]), InsertResult::Completed);
    }
}
