//! Multi-node simulation over the in-memory network.
//!
//! Nodes are stepped by hand: every call drains the network until no node
//! has a message left, so runs are deterministic and need no timers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, ensure, Context};
use tokio::time::Instant;

use bandchain::{Node, NodeConfig, MEGA_DIVIDER};
use bandchain_core::{Block, Keypair, PublicKey};
use bandchain_protocol::{verify_convergence, ExchangeState, MemoryNetwork, MemoryTransport};
use bandchain_store::{LedgerStore, MemoryStore};

/// How long a node waits for a message before counting as idle.
const IDLE: Duration = Duration::from_millis(5);

/// Upper bound on drain rounds; a crawl bounces at most a few times.
const MAX_ROUNDS: usize = 1_000;

pub type SimNode = Node<MemoryStore, MemoryTransport>;

/// A set of nodes sharing one in-memory network.
pub struct Simulation {
    network: Arc<MemoryNetwork>,
    nodes: Vec<SimNode>,
}

impl Simulation {
    /// Start `count` nodes with deterministic identities.
    pub async fn new(count: usize) -> Self {
        Self::with_config(count, NodeConfig::default()).await
    }

    pub async fn with_config(count: usize, config: NodeConfig) -> Self {
        let network = MemoryNetwork::new();
        let mut nodes = Vec::with_capacity(count);
        for i in 0..count {
            let mut seed = [0x5e; 32];
            seed[0] = i as u8;
            let keypair = Keypair::from_seed(&seed);
            let transport = network.create_transport(keypair.public_key()).await;
            nodes.push(Node::new(keypair, MemoryStore::new(), transport, config.clone()));
        }
        Self { network, nodes }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, index: usize) -> &SimNode {
        &self.nodes[index]
    }

    pub fn node_mut(&mut self, index: usize) -> &mut SimNode {
        &mut self.nodes[index]
    }

    pub fn public_key(&self, index: usize) -> PublicKey {
        self.nodes[index].public_key()
    }

    pub fn network(&self) -> &Arc<MemoryNetwork> {
        &self.network
    }

    /// Deliver messages until every node is idle. Returns how many were
    /// handled.
    pub async fn drain(&mut self) -> anyhow::Result<usize> {
        let mut handled = 0;
        for _ in 0..MAX_ROUNDS {
            let mut progressed = false;
            for node in &mut self.nodes {
                while node.process_next(IDLE).await? {
                    handled += 1;
                    progressed = true;
                }
            }
            if !progressed {
                return Ok(handled);
            }
        }
        bail!("network still busy after {} rounds", MAX_ROUNDS)
    }

    /// Run one complete signing round of `up_mb`/`down_mb` megabytes from
    /// node `requester` to node `responder`.
    pub async fn sign(
        &mut self,
        requester: usize,
        responder: usize,
        up_mb: u64,
        down_mb: u64,
    ) -> anyhow::Result<Block> {
        ensure!(requester != responder, "a node cannot sign with itself");
        let peer = self.public_key(responder);

        let node = &mut self.nodes[requester];
        node.increase_pending(peer, up_mb * MEGA_DIVIDER, down_mb * MEGA_DIVIDER);
        let request = node
            .flush_pending(Instant::now())
            .await?
            .context("nothing was due for signing")?;

        self.drain().await?;

        let state = self.nodes[requester].exchange_state();
        if state != ExchangeState::Completed {
            bail!("signing round ended in {:?}", state);
        }

        let me = self.public_key(requester);
        let block = self.nodes[requester]
            .store()
            .get_by_identity_and_sequence_number(&me, request.sequence_number_requester)
            .await?
            .context("completed block missing from requester chain")?;
        tracing::debug!(requester, responder, hash = %block.compute_hash(), "simulated round");
        Ok(block)
    }

    /// Crawl node `target` from node `crawler` starting at genesis, following
    /// every resume. Returns how many chain entries the crawler gained.
    pub async fn crawl(&mut self, crawler: usize, target: usize) -> anyhow::Result<u64> {
        let peer = self.public_key(target);
        let before = self.nodes[crawler].store().total_block_count().await?;

        self.nodes[crawler]
            .send_crawl_request(peer, Some(bandchain_core::GENESIS_SEQ))
            .await?;
        self.drain().await?;

        let after = self.nodes[crawler].store().total_block_count().await?;
        Ok(after - before)
    }

    /// True if every node holding blocks of node `owner` holds the same
    /// chain as the owner.
    pub async fn converged(&self, owner: usize) -> anyhow::Result<bool> {
        let identity = self.public_key(owner);
        let reference = self.nodes[owner].store();

        for (i, node) in self.nodes.iter().enumerate() {
            if i == owner || node.store().count_blocks(&identity).await? == 0 {
                continue;
            }
            let result = verify_convergence(reference, node.store(), &identity).await?;
            if result.is_diverged() {
                bail!("node {} diverged from the chain of node {}: {:?}", i, owner, result);
            }
            if !result.is_converged() {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
