//! The node: one identity, one store, one transport, one event loop.
//!
//! All store mutations happen on the task running [`Node::run`], which
//! processes incoming messages, subscribed events, the pending-bytes flush
//! and housekeeping one at a time. That single writer is what makes
//! sequence number assignment safe.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};

use bandchain_core::{Block, Keypair, PublicKey};
use bandchain_protocol::{
    blocks_for_request, crawl_replies, CrawledBlock, Crawler, ExchangeState, LedgerMessage,
    SignatureExchange, Transport,
};
use bandchain_store::LedgerStore;

use crate::config::NodeConfig;
use crate::crawler::AutoCrawl;
use crate::error::{NodeError, Result};
use crate::events::{EventSubscription, NodeEvent, TransferEvent, TransferStats};
use crate::pending::PendingBytesLedger;
use crate::stats::{self, BlockSummary, PeerEdge, Statistics};

/// A ledger node.
pub struct Node<S: LedgerStore, T: Transport> {
    keypair: Keypair,
    store: Arc<S>,
    transport: T,
    config: NodeConfig,
    exchange: SignatureExchange,
    crawler: Crawler,
    pending: PendingBytesLedger,
    auto_crawl: Option<AutoCrawl>,
    events: Option<EventSubscription>,
    /// Set by a flush tick; due peers are then signed back to back.
    flush_backlog: bool,
}

impl<S: LedgerStore, T: Transport> Node<S, T> {
    /// Create a new node.
    pub fn new(keypair: Keypair, store: S, transport: T, config: NodeConfig) -> Self {
        Self::with_shared_store(keypair, Arc::new(store), transport, config)
    }

    /// Create a node over a store that is also read elsewhere.
    pub fn with_shared_store(keypair: Keypair, store: Arc<S>, transport: T, config: NodeConfig) -> Self {
        Self {
            exchange: SignatureExchange::new(keypair.clone(), config.signature.clone()),
            crawler: Crawler::new(config.crawl.clone()),
            keypair,
            store,
            transport,
            config,
            pending: PendingBytesLedger::new(),
            auto_crawl: None,
            events: None,
            flush_backlog: false,
        }
    }

    /// Crawl every peer the overlay introduces.
    pub fn with_auto_crawl(mut self, policy: AutoCrawl) -> Self {
        self.auto_crawl = Some(policy);
        self
    }

    /// Receive events through `subscription`. It is unregistered on shutdown.
    pub fn with_subscription(mut self, subscription: EventSubscription) -> Self {
        self.events = Some(subscription);
        self
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_handle(&self) -> Arc<S> {
        Arc::clone(&self.store)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn pending(&self) -> &PendingBytesLedger {
        &self.pending
    }

    pub fn exchange_state(&self) -> ExchangeState {
        self.exchange.state()
    }

    pub fn crawler(&self) -> &Crawler {
        &self.crawler
    }

    pub fn is_subscribed(&self) -> bool {
        self.events.is_some()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accounting
    // ─────────────────────────────────────────────────────────────────────────

    /// Add raw byte counts exchanged with `peer` to its pending entry.
    pub fn increase_pending(&mut self, peer: PublicKey, up: u64, down: u64) {
        self.pending.increase(peer, up, down);
    }

    /// Account a finished transfer. Transfers without a resolvable peer are
    /// dropped with a warning.
    pub fn record_transfer<E: TransferStats + ?Sized>(&mut self, transfer: &E) {
        let Some(peer) = transfer.peer_identity() else {
            tracing::warn!(
                up = transfer.bytes_up(),
                down = transfer.bytes_down(),
                "transfer without peer identity dropped"
            );
            return;
        };
        if peer == self.public_key() {
            tracing::warn!("transfer with own identity dropped");
            return;
        }
        self.increase_pending(peer, transfer.bytes_up(), transfer.bytes_down());
    }

    /// Start one signing round for the first peer with whole megabytes
    /// pending, in key order.
    ///
    /// Does nothing while a request is outstanding; the bytes stay pending
    /// for a later flush. The entry is reset once the half-signed block is
    /// persisted, whether or not the send succeeds.
    pub async fn flush_pending(&mut self, now: Instant) -> Result<Option<Block>> {
        if let Some(peer) = self.exchange.outstanding_peer() {
            tracing::debug!(peer = %peer, "flush skipped, signature request outstanding");
            return Ok(None);
        }
        let Some((peer, up, down)) = self.pending.due().into_iter().next() else {
            return Ok(None);
        };

        let block = self.exchange.request(self.store.as_ref(), peer, up, down, now).await?;
        self.pending.reset(&peer);

        let message = LedgerMessage::Signature { block: block.clone() };
        if let Err(e) = self.transport.send(&peer, message).await {
            tracing::warn!(peer = %peer, error = %e, "signature request not delivered");
        }
        Ok(Some(block))
    }

    /// Flush tick: sign every due peer, one round after the other.
    ///
    /// Starts the first round now. The following ones are started by
    /// [`Node::drain_backlog`] as each round completes or times out.
    pub async fn flush_tick(&mut self, now: Instant) -> Result<Option<Block>> {
        self.flush_backlog = true;
        self.drain_backlog(now).await
    }

    /// Start the next round of the current flush once no request is
    /// outstanding.
    pub async fn drain_backlog(&mut self, now: Instant) -> Result<Option<Block>> {
        if !self.flush_backlog || self.exchange.is_busy() {
            return Ok(None);
        }
        match self.flush_pending(now).await {
            Ok(Some(block)) => Ok(Some(block)),
            other => {
                self.flush_backlog = false;
                other
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Crawling
    // ─────────────────────────────────────────────────────────────────────────

    /// Ask `peer` for its chain from `since`, or from the latest block held
    /// for it.
    pub async fn send_crawl_request(&mut self, peer: PublicKey, since: Option<u64>) -> Result<()> {
        let request = self
            .crawler
            .crawl_request(self.store.as_ref(), peer, since, Instant::now())
            .await?;
        self.transport.send(&peer, request).await?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Incoming
    // ─────────────────────────────────────────────────────────────────────────

    /// Handle one message from `from`.
    pub async fn handle_message(&mut self, from: PublicKey, message: LedgerMessage) -> Result<()> {
        let me = self.public_key();
        tracing::trace!(peer = %from, kind = message.kind(), "message received");

        match message {
            LedgerMessage::Signature { block } => {
                if block.public_key_responder == me && !block.has_responder_half() {
                    if block.public_key_requester != from {
                        tracing::warn!(peer = %from, "signature request relayed by a third party dropped");
                        return Ok(());
                    }
                    if !self.exchange.admit_request(&block) {
                        return Ok(());
                    }
                    let response = self.exchange.respond(self.store.as_ref(), &block).await?;
                    self.transport
                        .send(&from, LedgerMessage::Signature { block: response })
                        .await?;
                } else if block.public_key_requester == me {
                    self.exchange
                        .accept_response(self.store.as_ref(), &from, &block)
                        .await?;
                } else {
                    tracing::warn!(peer = %from, "signature message for another identity dropped");
                }
            }
            LedgerMessage::CrawlRequest { requested_sequence_number } => {
                let blocks = blocks_for_request(
                    self.store.as_ref(),
                    &me,
                    requested_sequence_number,
                    self.config.crawl.max_blocks_per_crawl,
                )
                .await?;
                if blocks.is_empty() {
                    tracing::debug!(peer = %from, since = requested_sequence_number, "nothing to crawl");
                }
                for reply in crawl_replies(blocks) {
                    self.transport.send(&from, reply).await?;
                }
            }
            LedgerMessage::CrawlResponse { block } => {
                let outcome = self
                    .crawler
                    .handle_response(self.store.as_ref(), &from, &block, Instant::now())
                    .await?;
                if outcome == CrawledBlock::Stored {
                    tracing::trace!(peer = %from, hash = %block.compute_hash(), "crawled block");
                }
            }
            LedgerMessage::CrawlResume => {
                let next = self
                    .crawler
                    .handle_resume(self.store.as_ref(), &from, Instant::now())
                    .await?;
                if let Some(request) = next {
                    self.transport.send(&from, request).await?;
                }
            }
        }
        Ok(())
    }

    /// Handle one event from the overlay.
    ///
    /// An unknown transfer kind is returned as an error and stops
    /// [`Node::run`].
    pub async fn handle_event(&mut self, event: NodeEvent) -> Result<()> {
        match event {
            NodeEvent::Transfer(transfer) => self.record_transfer(&transfer),
            NodeEvent::TransferRecord(record) => {
                let transfer = TransferEvent::try_from(record)?;
                self.record_transfer(&transfer);
            }
            NodeEvent::PeerIntroduced(peer) => {
                let target = self
                    .auto_crawl
                    .as_ref()
                    .and_then(|policy| policy.on_peer_introduced(&self.keypair.public_key(), &peer));
                if let Some((peer, since)) = target {
                    self.send_crawl_request(peer, since).await?;
                }
            }
        }
        Ok(())
    }

    /// Receive and handle one message, waiting at most `timeout`, then
    /// continue a pending flush.
    ///
    /// Returns false if nothing arrived.
    pub async fn process_next(&mut self, timeout: Duration) -> Result<bool> {
        match self.transport.recv_timeout(timeout).await? {
            Some((from, message)) => {
                self.handle_message(from, message).await?;
                self.drain_backlog(Instant::now()).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Expire the outstanding signature request and stalled crawls.
    pub fn housekeeping(&mut self, now: Instant) -> Option<Block> {
        self.crawler.expire_stalled(now);
        self.exchange.expire(now)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Event loop
    // ─────────────────────────────────────────────────────────────────────────

    /// Run until `shutdown` flips to true or its sender goes away.
    ///
    /// Protocol errors are logged and the loop carries on. A transport
    /// failure or an unknown transfer kind ends the loop with an error. The
    /// event subscription is unregistered however the loop ends.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut flush = interval(self.config.flush_interval);
        flush.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut housekeeping = interval(self.config.housekeeping_interval);
        housekeeping.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            identity = %self.public_key(),
            flush_ms = self.config.flush_interval.as_millis() as u64,
            auto_crawl = self.auto_crawl.is_some(),
            "node started"
        );

        let outcome = loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break Ok(());
                    }
                }
                received = self.transport.recv() => {
                    match received {
                        Ok((from, message)) => {
                            let kind = message.kind();
                            if let Err(e) = self.handle_message(from, message).await {
                                tracing::warn!(peer = %from, kind, error = %e, "message handling failed");
                            }
                            if let Err(e) = self.drain_backlog(Instant::now()).await {
                                tracing::warn!(error = %e, "pending flush failed");
                            }
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "transport failed");
                            break Err(NodeError::from(e));
                        }
                    }
                }
                event = next_event(&mut self.events) => {
                    match event {
                        Some(event) => {
                            if let Err(e) = self.handle_event(event).await {
                                if e.is_fatal() {
                                    tracing::error!(error = %e, "fatal event");
                                    break Err(e);
                                }
                                tracing::warn!(error = %e, "event handling failed");
                            }
                        }
                        None => {
                            tracing::debug!("event source closed");
                            self.events = None;
                        }
                    }
                }
                _ = flush.tick() => {
                    if let Err(e) = self.flush_tick(Instant::now()).await {
                        tracing::warn!(error = %e, "pending flush failed");
                    }
                }
                _ = housekeeping.tick() => {
                    let now = Instant::now();
                    if self.housekeeping(now).is_some() {
                        if let Err(e) = self.drain_backlog(now).await {
                            tracing::warn!(error = %e, "pending flush failed");
                        }
                    }
                }
            }
        };

        self.shutdown();
        tracing::info!(identity = %self.public_key(), "node stopped");
        outcome
    }

    /// Unregister the event subscription.
    pub fn shutdown(&mut self) {
        if let Some(mut subscription) = self.events.take() {
            subscription.unregister();
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reporting
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn statistics(&self) -> Result<Statistics> {
        Ok(stats::statistics(self.store.as_ref(), &self.public_key()).await?)
    }

    pub async fn blocks_of(&self, identity: &PublicKey, limit: Option<usize>) -> Result<Vec<BlockSummary>> {
        Ok(stats::blocks_of(self.store.as_ref(), identity, limit).await?)
    }

    pub async fn trust_edges(&self) -> Result<Vec<PeerEdge>> {
        Ok(stats::trust_edges(self.store.as_ref(), &self.public_key()).await?)
    }
}

async fn next_event(events: &mut Option<EventSubscription>) -> Option<NodeEvent> {
    match events {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}
