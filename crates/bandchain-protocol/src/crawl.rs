//! Crawl protocol: pull replication of another identity's chain.
//!
//! ```text
//! Crawler                                   Crawlee
//!   |-------- CrawlRequest(since) ------------>|
//!   |<------- CrawlResponse(block) ------------|  one per block, in order
//!   |<------- CrawlResponse(block) ------------|
//!   |<------- CrawlResume ---------------------|  only after more than one block
//!   |-------- CrawlRequest(latest known) ----->|
//!   |<------- CrawlResponse(block) ------------|  a single block ends the crawl
//! ```
//!
//! A crawlee with nothing at or after `since` stays silent. Each resume is
//! answered with a new request starting at the latest sequence number the
//! crawler now holds for that peer; the bounds in [`CrawlConfig`] stop a
//! crawl that keeps resuming or goes quiet.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use bandchain_core::{validate_block, Block, PublicKey, GENESIS_SEQ, UNKNOWN_SEQ};
use bandchain_store::{InsertResult, LedgerStore, LedgerStoreExt};

use crate::error::Result;
use crate::messages::{limits, LedgerMessage};

/// Configuration for crawling.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Max blocks sent in answer to one crawl request.
    pub max_blocks_per_crawl: usize,
    /// Resumes followed per crawl before giving up.
    pub max_resumes: u32,
    /// A crawl with no activity for this long is dropped.
    pub stall_timeout: Duration,
    /// Whether to validate received blocks before storing.
    pub validate_blocks: bool,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_blocks_per_crawl: limits::MAX_BLOCKS_PER_CRAWL,
            max_resumes: 64,
            stall_timeout: Duration::from_secs(30),
            validate_blocks: true,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Crawlee
// ─────────────────────────────────────────────────────────────────────────────

/// Blocks of `identity` to send for a crawl request starting at `since`.
pub async fn blocks_for_request<S: LedgerStore + ?Sized>(
    store: &S,
    identity: &PublicKey,
    since: u64,
    max_blocks: usize,
) -> Result<Vec<Block>> {
    let mut blocks = store.get_blocks_since(identity, since).await?;
    blocks.truncate(max_blocks);
    Ok(blocks)
}

/// Messages answering a crawl request: one response per block, then a resume
/// if more than one block went out. Empty when there is nothing to send.
pub fn crawl_replies(blocks: Vec<Block>) -> Vec<LedgerMessage> {
    let resume = blocks.len() > 1;
    let mut messages: Vec<LedgerMessage> = blocks
        .into_iter()
        .map(|block| LedgerMessage::CrawlResponse { block })
        .collect();
    if resume {
        messages.push(LedgerMessage::CrawlResume);
    }
    messages
}

// ─────────────────────────────────────────────────────────────────────────────
// Crawler
// ─────────────────────────────────────────────────────────────────────────────

/// What happened to one received block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawledBlock {
    /// New, now stored.
    Stored,
    /// Already known, skipped.
    Known,
    /// Failed validation, dropped.
    Invalid,
    /// Collides with a stored block at the same chain position, dropped.
    Conflict,
}

/// Progress of one crawl against one peer.
#[derive(Debug, Clone)]
pub struct CrawlSession {
    pub peer: PublicKey,
    /// Resumes followed so far.
    pub resumes: u32,
    /// Blocks received since the session started.
    pub received: u64,
    /// Blocks that were new.
    pub stored: u64,
    answered: bool,
    last_activity: Instant,
}

impl CrawlSession {
    fn new(peer: PublicKey, now: Instant) -> Self {
        Self {
            peer,
            resumes: 0,
            received: 0,
            stored: 0,
            answered: false,
            last_activity: now,
        }
    }
}

/// Crawler side of the crawl protocol.
pub struct Crawler {
    config: CrawlConfig,
    sessions: HashMap<PublicKey, CrawlSession>,
}

impl Crawler {
    pub fn new(config: CrawlConfig) -> Self {
        Self {
            config,
            sessions: HashMap::new(),
        }
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    /// Build a crawl request for `peer`.
    ///
    /// Without `since` the request starts at the latest sequence number
    /// held for `peer`, or at [`GENESIS_SEQ`] when nothing is known.
    pub async fn crawl_request<S: LedgerStore + ?Sized>(
        &mut self,
        store: &S,
        peer: PublicKey,
        since: Option<u64>,
        now: Instant,
    ) -> Result<LedgerMessage> {
        let since = match since {
            Some(seq) => seq,
            None => match store.get_latest_sequence_number(&peer).await? {
                UNKNOWN_SEQ => GENESIS_SEQ,
                seq => seq,
            },
        };

        let session = self
            .sessions
            .entry(peer)
            .or_insert_with(|| CrawlSession::new(peer, now));
        session.answered = false;
        session.last_activity = now;

        tracing::debug!(peer = %peer, since, "crawl request");
        Ok(LedgerMessage::CrawlRequest {
            requested_sequence_number: since,
        })
    }

    /// Handle one block received from `from`.
    ///
    /// Identities come from the block's own public keys. The block is added
    /// only when its hash is not stored yet.
    pub async fn handle_response<S: LedgerStore + ?Sized>(
        &mut self,
        store: &S,
        from: &PublicKey,
        block: &Block,
        now: Instant,
    ) -> Result<CrawledBlock> {
        let outcome = self.ingest(store, from, block).await?;

        if let Some(session) = self.sessions.get_mut(from) {
            session.answered = true;
            session.last_activity = now;
            session.received += 1;
            if outcome == CrawledBlock::Stored {
                session.stored += 1;
            }
        }
        Ok(outcome)
    }

    async fn ingest<S: LedgerStore + ?Sized>(
        &self,
        store: &S,
        from: &PublicKey,
        block: &Block,
    ) -> Result<CrawledBlock> {
        if !block.public_key_requester.is_valid() || !block.public_key_responder.is_valid() {
            tracing::warn!(peer = %from, "crawled block without resolvable identities");
            return Ok(CrawledBlock::Invalid);
        }
        if self.config.validate_blocks {
            if let Err(e) = validate_block(block) {
                tracing::warn!(peer = %from, error = %e, "crawled block failed validation");
                return Ok(CrawledBlock::Invalid);
            }
        }

        let hash = block.compute_hash();
        if store.contains(&hash).await? {
            tracing::debug!(peer = %from, %hash, "crawled block already known");
            return Ok(CrawledBlock::Known);
        }

        match store.add_block(block).await? {
            InsertResult::Inserted | InsertResult::Completed => {
                tracing::debug!(peer = %from, %hash, "crawled block stored");
                Ok(CrawledBlock::Stored)
            }
            InsertResult::AlreadyExists => Ok(CrawledBlock::Known),
            InsertResult::Conflict { existing } => {
                tracing::warn!(peer = %from, %hash, %existing, "crawled block conflicts with stored block");
                Ok(CrawledBlock::Conflict)
            }
        }
    }

    /// Handle a resume from `from`: ask again from the latest known sequence
    /// number, unless this crawl has used up its resumes.
    pub async fn handle_resume<S: LedgerStore + ?Sized>(
        &mut self,
        store: &S,
        from: &PublicKey,
        now: Instant,
    ) -> Result<Option<LedgerMessage>> {
        let session = self
            .sessions
            .entry(*from)
            .or_insert_with(|| CrawlSession::new(*from, now));

        if session.resumes >= self.config.max_resumes {
            tracing::warn!(
                peer = %from,
                resumes = session.resumes,
                "crawl resumed too often, giving up"
            );
            self.sessions.remove(from);
            return Ok(None);
        }
        session.resumes += 1;

        self.crawl_request(store, *from, None, now).await.map(Some)
    }

    /// Drop crawls idle for longer than the stall timeout.
    ///
    /// Returns the peers whose crawl went unanswered; crawls that simply
    /// ended are dropped quietly.
    pub fn expire_stalled(&mut self, now: Instant) -> Vec<PublicKey> {
        let timeout = self.config.stall_timeout;
        let idle: Vec<PublicKey> = self
            .sessions
            .values()
            .filter(|s| now.saturating_duration_since(s.last_activity) >= timeout)
            .map(|s| s.peer)
            .collect();

        let mut stalled = Vec::new();
        for peer in idle {
            if let Some(session) = self.sessions.remove(&peer) {
                if session.answered {
                    tracing::debug!(peer = %peer, stored = session.stored, "crawl finished");
                } else {
                    tracing::warn!(peer = %peer, resumes = session.resumes, "crawl stalled");
                    stalled.push(peer);
                }
            }
        }
        stalled
    }

    pub fn session(&self, peer: &PublicKey) -> Option<&CrawlSession> {
        self.sessions.get(peer)
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }
}
