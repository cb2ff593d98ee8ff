//! Test fixtures and helpers.
//!
//! An identity with its own store, for building chains without a network.

use bandchain_core::{Block, Keypair, PublicKey};
use bandchain_store::{LedgerStore, LedgerStoreExt, MemoryStore, Result};

/// A keypair and the memory store of its owner.
pub struct TestFixture {
    pub keypair: Keypair,
    pub store: MemoryStore,
}

impl TestFixture {
    /// Create a new test fixture with a random keypair.
    pub fn new() -> Self {
        Self {
            keypair: Keypair::generate(),
            store: MemoryStore::new(),
        }
    }

    /// Create with a deterministic keypair from seed.
    pub fn with_seed(seed: [u8; 32]) -> Self {
        Self {
            keypair: Keypair::from_seed(&seed),
            store: MemoryStore::new(),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    /// Build and sign the next request of this identity, without storing it.
    pub async fn make_request(&self, responder: PublicKey, up: u64, down: u64) -> Result<Block> {
        let mut block = self
            .store
            .create_block(&self.public_key(), &responder)
            .await?
            .with_interaction(up, down);
        block.sign_as_requester(&self.keypair);
        Ok(block)
    }

    /// Countersign `request` on top of this identity's latest block, without
    /// storing it.
    pub async fn make_response(&self, request: &Block) -> Result<Block> {
        let latest = self.store.get_latest(&self.public_key()).await?;
        Ok(request.countersign(latest.as_ref(), &self.keypair))
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Sign one interaction between two fixtures and store the result on both
/// sides.
pub async fn sign_between(
    requester: &TestFixture,
    responder: &TestFixture,
    up: u64,
    down: u64,
) -> Result<Block> {
    let request = requester.make_request(responder.public_key(), up, down).await?;
    let block = responder.make_response(&request).await?;
    requester.store.add_block(&block).await?;
    responder.store.add_block(&block).await?;
    Ok(block)
}

/// Create multiple test fixtures for multi-party tests.
pub fn multi_party_fixtures(count: usize) -> Vec<TestFixture> {
    (0..count)
        .map(|i| {
            let mut seed = [0u8; 32];
            seed[0] = i as u8;
            seed[1] = 0xbc;
            TestFixture::with_seed(seed)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bandchain_core::{validate_block, Totals, GENESIS_ID};

    #[tokio::test]
    async fn test_fixture_request() {
        let parties = multi_party_fixtures(2);
        let block = parties[0].make_request(parties[1].public_key(), 3, 4).await.unwrap();

        assert_eq!(block.sequence_number_requester, 1);
        assert_eq!(block.previous_hash_requester, GENESIS_ID);
        assert!(block.is_half_signed());
        validate_block(&block).unwrap();
    }

    #[tokio::test]
    async fn test_fixture_chain() {
        let parties = multi_party_fixtures(3);
        let (a, b, c) = (&parties[0], &parties[1], &parties[2]);

        let first = sign_between(a, b, 10, 5).await.unwrap();
        let second = sign_between(c, a, 1, 2).await.unwrap();

        assert_eq!(second.sequence_number_responder, 2);
        assert_eq!(second.previous_hash_responder, first.compute_hash());
        assert_eq!(a.store.get_total(&a.public_key()).await.unwrap(), Some(Totals::new(12, 6)));
        assert!(a.store.verify_chain(&a.public_key()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_multi_party() {
        let parties = multi_party_fixtures(3);

        let pks: Vec<_> = parties.iter().map(|p| p.public_key()).collect();
        assert_ne!(pks[0], pks[1]);
        assert_ne!(pks[1], pks[2]);
        assert_ne!(pks[0], pks[2]);
    }
}
