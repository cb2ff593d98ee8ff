//! # Bandchain
//!
//! A tamper-evident ledger of bandwidth exchanged between peers.
//!
//! Every node keeps a hash-linked chain of blocks. A block records one
//! interaction and carries the signatures of both participants. Nodes crawl
//! each other's chains so anyone can check what a peer claims.
//!
//! ## Overview
//!
//! - Transfers reported by the overlay accumulate as pending bytes per peer
//! - A periodic flush turns whole megabytes into a signature request
//! - The peer countersigns; both sides store the block in their chains
//! - Introduced peers can be crawled automatically
//!
//! ## Usage
//!
//! ```rust,no_run
//! use bandchain::{EventBus, Node, NodeConfig, NodeEvent, AutoCrawl};
//! use bandchain::core::Keypair;
//! use bandchain::protocol::MemoryNetwork;
//! use bandchain::store::SqliteStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let keypair = Keypair::generate();
//!     let store = SqliteStore::open("ledger.db")?;
//!     let network = MemoryNetwork::new();
//!     let transport = network.create_transport(keypair.public_key()).await;
//!
//!     let bus = EventBus::new();
//!     let mut node = Node::new(keypair, store, transport, NodeConfig::default())
//!         .with_auto_crawl(AutoCrawl::new())
//!         .with_subscription(bus.subscribe());
//!
//!     let (stop, stopped) = tokio::sync::watch::channel(false);
//!     let handle = tokio::spawn(async move { node.run(stopped).await });
//!
//!     // feed events with bus.publish(NodeEvent::Transfer(..))
//!     let _ = stop.send(true);
//!     handle.await??;
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `bandchain::core` - Blocks, keys, canonical encoding
//! - `bandchain::store` - Ledger storage and SQLite
//! - `bandchain::protocol` - Signature exchange, crawl, transport

pub mod config;
pub mod crawler;
pub mod error;
pub mod events;
pub mod node;
pub mod pending;
pub mod stats;

pub use bandchain_core as core;
pub use bandchain_protocol as protocol;
pub use bandchain_store as store;

pub use config::NodeConfig;
pub use crawler::AutoCrawl;
pub use error::{NodeError, Result};
pub use events::{EventBus, EventSubscription, NodeEvent, TransferEvent, TransferRecord, TransferStats};
pub use node::Node;
pub use pending::{PendingBytes, PendingBytesLedger, MEGA_DIVIDER};
pub use stats::{BlockSummary, LatestBlock, PeerEdge, Statistics, DEFAULT_BLOCK_LIMIT};

pub use bandchain_core::{Block, BlockHash, Keypair, PublicKey, Totals};
