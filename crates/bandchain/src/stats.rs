//! Read-only reporting over a ledger store.
//!
//! Everything here serializes with serde; identities and hashes are rendered
//! as hex strings.

use serde::Serialize;

use bandchain_core::{Block, PublicKey};
use bandchain_store::{LedgerStore, LedgerStoreExt, Result};

/// Default number of blocks returned by [`blocks_of`].
pub const DEFAULT_BLOCK_LIMIT: usize = 100;

/// Aggregate view of one identity's chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Statistics {
    pub self_id: String,
    pub self_total_blocks: u64,
    pub self_total_up_mb: u64,
    pub self_total_down_mb: u64,
    pub latest_block: Option<LatestBlock>,
}

/// The most recent block of a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LatestBlock {
    pub id: String,
    pub insert_time: Option<i64>,
    pub requester_id: String,
    pub responder_id: String,
    pub up_mb: u64,
    pub down_mb: u64,
}

/// One block as seen from the identity whose chain it was read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockSummary {
    pub id: String,
    pub sequence_number: u64,
    pub is_requester: bool,
    pub counterparty: String,
    pub up: u64,
    pub down: u64,
    pub total_up: u64,
    pub total_down: u64,
    pub fully_signed: bool,
    pub insert_time: Option<i64>,
}

/// A counterparty with the number of blocks shared with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerEdge {
    pub public_key: String,
    pub block_count: u64,
    pub last_block_time: Option<i64>,
}

/// Statistics for `identity`.
pub async fn statistics<S: LedgerStore + ?Sized>(store: &S, identity: &PublicKey) -> Result<Statistics> {
    let total_blocks = store.count_blocks(identity).await?;
    let totals = store.get_total(identity).await?.unwrap_or_default();
    let latest = store.get_latest(identity).await?;

    Ok(Statistics {
        self_id: identity.to_hex(),
        self_total_blocks: total_blocks,
        self_total_up_mb: totals.up,
        self_total_down_mb: totals.down,
        latest_block: latest.map(|block| LatestBlock {
            id: block.compute_hash().to_hex(),
            insert_time: block.insert_time,
            requester_id: block.public_key_requester.to_hex(),
            responder_id: block.public_key_responder.to_hex(),
            up_mb: block.up,
            down_mb: block.down,
        }),
    })
}

/// The `limit` most recent blocks of `identity` (default
/// [`DEFAULT_BLOCK_LIMIT`]), newest first.
pub async fn blocks_of<S: LedgerStore + ?Sized>(
    store: &S,
    identity: &PublicKey,
    limit: Option<usize>,
) -> Result<Vec<BlockSummary>> {
    let blocks = store
        .get_recent_blocks(identity, limit.unwrap_or(DEFAULT_BLOCK_LIMIT))
        .await?;
    Ok(blocks.iter().filter_map(|b| summarize(b, identity)).collect())
}

fn summarize(block: &Block, identity: &PublicKey) -> Option<BlockSummary> {
    let delta = block.delta_for(identity)?;
    let totals = block.totals_for(identity)?;

    Some(BlockSummary {
        id: block.compute_hash().to_hex(),
        sequence_number: block.sequence_number_for(identity)?,
        is_requester: block.public_key_requester == *identity,
        counterparty: block.counterparty(identity)?.to_hex(),
        up: delta.up,
        down: delta.down,
        total_up: totals.up,
        total_down: totals.down,
        fully_signed: block.is_fully_signed(),
        insert_time: block.insert_time,
    })
}

/// Counterparties of `identity`, most blocks first.
pub async fn trust_edges<S: LedgerStore + ?Sized>(store: &S, identity: &PublicKey) -> Result<Vec<PeerEdge>> {
    Ok(store
        .get_trust_edges(identity)
        .await?
        .into_iter()
        .map(|edge| PeerEdge {
            public_key: edge.counterparty.to_hex(),
            block_count: edge.block_count,
            last_block_time: edge.last_block_time,
        })
        .collect())
}
