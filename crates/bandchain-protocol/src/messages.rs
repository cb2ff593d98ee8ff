//! Wire messages exchanged between ledger nodes.

use serde::{Deserialize, Serialize};

use bandchain_core::Block;

/// Message size limits.
pub mod limits {
    /// Max encoded size of a single message.
    pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;
    /// Max blocks a crawlee sends in answer to one crawl request.
    pub const MAX_BLOCKS_PER_CRAWL: usize = 100;
}

/// Ledger protocol messages.
///
/// A `Signature` message carries a half-signed block when sent by the
/// requester and the completed block when sent back by the responder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerMessage {
    /// Signature request or response.
    Signature { block: Block },

    /// Ask a peer for its chain starting at a sequence number (inclusive).
    CrawlRequest { requested_sequence_number: u64 },

    /// One block of the crawlee's chain.
    CrawlResponse { block: Block },

    /// More history may follow; the crawler should ask again.
    CrawlResume,
}

impl LedgerMessage {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerMessage::Signature { .. } => "signature",
            LedgerMessage::CrawlRequest { .. } => "crawl_request",
            LedgerMessage::CrawlResponse { .. } => "crawl_response",
            LedgerMessage::CrawlResume => "crawl_resume",
        }
    }

    /// The block carried by this message, if any.
    pub fn block(&self) -> Option<&Block> {
        match self {
            LedgerMessage::Signature { block } | LedgerMessage::CrawlResponse { block } => Some(block),
            LedgerMessage::CrawlRequest { .. } | LedgerMessage::CrawlResume => None,
        }
    }
}
