//! Auto-crawl policy: crawl every peer the overlay introduces.

use bandchain_core::PublicKey;

/// Policy attached to a node that turns peer introductions into crawls.
#[derive(Debug, Clone, Default)]
pub struct AutoCrawl {
    /// Start sequence number for introduced peers. `None` resumes from the
    /// latest block already held for the peer.
    pub since: Option<u64>,
}

impl AutoCrawl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Crawl introduced peers starting at sequence number `since`.
    pub fn from_sequence_number(since: u64) -> Self {
        Self { since: Some(since) }
    }

    /// Decide what to crawl when `peer` is introduced to `local`.
    pub fn on_peer_introduced(
        &self,
        local: &PublicKey,
        peer: &PublicKey,
    ) -> Option<(PublicKey, Option<u64>)> {
        if peer == local {
            return None;
        }
        Some((*peer, self.since))
    }
}
