//! In-memory implementation of the LedgerStore trait.
//!
//! Same semantics as SQLite, no persistence. Used by tests and simulations.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use bandchain_core::{Block, BlockHash, PublicKey};

use crate::error::{Result, StoreError};
use crate::traits::{
    check_storable, now_millis, resolve_slot, summarize, InsertResult, LedgerStore, SlotAction,
    TrustEdge,
};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    /// Chains by owner, keyed by sequence number.
    chains: HashMap<PublicKey, BTreeMap<u64, Block>>,

    /// Owners holding a copy of each hash.
    owners: HashMap<BlockHash, BTreeSet<PublicKey>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner.write().map_err(|_| StoreError::Poisoned)
    }
}

impl Inner {
    fn chain(&self, identity: &PublicKey) -> impl DoubleEndedIterator<Item = &Block> {
        self.chains.get(identity).into_iter().flat_map(|c| c.values())
    }

    fn at(&self, identity: &PublicKey, seq: u64) -> Option<&Block> {
        self.chains.get(identity)?.get(&seq)
    }

    fn put(&mut self, owner: PublicKey, seq: u64, hash: BlockHash, block: Block) {
        if let Some(old) = self.chains.entry(owner).or_default().insert(seq, block) {
            let old_hash = old.compute_hash();
            if let Some(set) = self.owners.get_mut(&old_hash) {
                set.remove(&owner);
                if set.is_empty() {
                    self.owners.remove(&old_hash);
                }
            }
        }
        self.owners.entry(hash).or_default().insert(owner);
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn add_block(&self, block: &Block) -> Result<InsertResult> {
        check_storable(block)?;
        let mut inner = self.write()?;
        let hash = block.compute_hash();

        let mut plan = Vec::with_capacity(2);
        for owner in block.chain_owners() {
            let seq = block
                .sequence_number_for(&owner)
                .ok_or_else(|| StoreError::InvalidData("owner without sequence number".into()))?;
            let existing = inner.at(&owner, seq);

            let action = resolve_slot(block, &hash, existing);
            if let SlotAction::Conflict(existing) = action {
                return Ok(InsertResult::Conflict { existing });
            }
            plan.push((owner, seq, action, existing.and_then(|b| b.insert_time)));
        }

        let now = now_millis();
        for (owner, seq, action, previous_time) in &plan {
            let insert_time = match action {
                SlotAction::Insert => now,
                SlotAction::Replace => previous_time.unwrap_or(now),
                SlotAction::Keep | SlotAction::Conflict(_) => continue,
            };
            let mut stored = block.clone();
            stored.insert_time = Some(insert_time);
            inner.put(*owner, *seq, hash, stored);
        }

        let actions: Vec<SlotAction> = plan.iter().map(|(_, _, a, _)| *a).collect();
        Ok(summarize(&actions))
    }

    async fn contains(&self, hash: &BlockHash) -> Result<bool> {
        Ok(self.read()?.owners.contains_key(hash))
    }

    async fn get_block(&self, hash: &BlockHash) -> Result<Option<Block>> {
        let inner = self.read()?;
        let found = inner.owners.get(hash).and_then(|owners| {
            owners.iter().find_map(|owner| {
                inner
                    .chain(owner)
                    .find(|b| b.compute_hash() == *hash)
                    .cloned()
            })
        });
        Ok(found)
    }

    async fn get_latest(&self, identity: &PublicKey) -> Result<Option<Block>> {
        Ok(self.read()?.chain(identity).next_back().cloned())
    }

    async fn get_by_identity_and_sequence_number(
        &self,
        identity: &PublicKey,
        sequence_number: u64,
    ) -> Result<Option<Block>> {
        Ok(self.read()?.at(identity, sequence_number).cloned())
    }

    async fn get_blocks_since(&self, identity: &PublicKey, seq: u64) -> Result<Vec<Block>> {
        let inner = self.read()?;
        Ok(inner
            .chains
            .get(identity)
            .map(|c| c.range(seq..).map(|(_, b)| b.clone()).collect())
            .unwrap_or_default())
    }

    async fn get_blocks_until(&self, identity: &PublicKey, seq: u64) -> Result<Vec<Block>> {
        let inner = self.read()?;
        Ok(inner
            .chains
            .get(identity)
            .map(|c| c.range(..=seq).map(|(_, b)| b.clone()).collect())
            .unwrap_or_default())
    }

    async fn get_block_before(&self, block: &Block, identity: &PublicKey) -> Result<Option<Block>> {
        let Some(seq) = block.sequence_number_for(identity) else {
            return Ok(None);
        };
        let inner = self.read()?;
        Ok(inner
            .chains
            .get(identity)
            .and_then(|c| c.range(..seq).next_back().map(|(_, b)| b.clone())))
    }

    async fn get_block_after(&self, block: &Block, identity: &PublicKey) -> Result<Option<Block>> {
        let Some(seq) = block.sequence_number_for(identity) else {
            return Ok(None);
        };
        let inner = self.read()?;
        Ok(inner.chains.get(identity).and_then(|c| {
            c.range(seq.saturating_add(1)..)
                .next()
                .filter(|(s, _)| **s > seq)
                .map(|(_, b)| b.clone())
        }))
    }

    async fn get_linked(&self, block: &Block, identity: &PublicKey) -> Result<Option<Block>> {
        let Some(counterparty) = block.counterparty(identity) else {
            return Ok(None);
        };
        let Some(seq) = block.sequence_number_for(&counterparty) else {
            return Ok(None);
        };
        let hash = block.compute_hash();
        let inner = self.read()?;
        Ok(inner
            .at(&counterparty, seq)
            .filter(|b| b.compute_hash() == hash)
            .cloned())
    }

    async fn get_recent_blocks(&self, identity: &PublicKey, limit: usize) -> Result<Vec<Block>> {
        Ok(self.read()?.chain(identity).rev().take(limit).cloned().collect())
    }

    async fn count_blocks(&self, identity: &PublicKey) -> Result<u64> {
        Ok(self.read()?.chains.get(identity).map_or(0, |c| c.len() as u64))
    }

    async fn total_block_count(&self) -> Result<u64> {
        Ok(self.read()?.chains.values().map(|c| c.len() as u64).sum())
    }

    async fn get_trust_edges(&self, identity: &PublicKey) -> Result<Vec<TrustEdge>> {
        let inner = self.read()?;
        let mut edges: BTreeMap<PublicKey, TrustEdge> = BTreeMap::new();

        for block in inner.chain(identity) {
            let Some(counterparty) = block.counterparty(identity) else {
                continue;
            };
            let edge = edges.entry(counterparty).or_insert(TrustEdge {
                counterparty,
                block_count: 0,
                last_block_time: None,
            });
            edge.block_count += 1;
            edge.last_block_time = edge.last_block_time.max(block.insert_time);
        }

        let mut edges: Vec<TrustEdge> = edges.into_values().collect();
        edges.sort_by(|a, b| b.block_count.cmp(&a.block_count));
        Ok(edges)
    }
}
