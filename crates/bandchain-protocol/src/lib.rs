//! # Bandchain Protocol
//!
//! The two protocols that fill a ledger store: the signature exchange that
//! creates blocks, and the crawl that replicates other identities' chains.
//!
//! ## Overview
//!
//! - [`SignatureExchange`] - requester and responder sides of block signing
//! - [`Crawler`] and [`blocks_for_request`] - the two sides of a crawl
//! - [`LedgerMessage`] and [`codec`] - wire messages and their CBOR encoding
//! - [`Transport`] - how messages reach peers, with an in-memory network
//! - [`verify_convergence`] - compare two replicas of a chain
//!
//! ## Usage
//!
//! ```rust,no_run
//! use bandchain_core::Keypair;
//! use bandchain_protocol::{SignatureConfig, SignatureExchange};
//! use bandchain_store::MemoryStore;
//!
//! async fn example() -> bandchain_protocol::Result<()> {
//!     let store = MemoryStore::new();
//!     let peer = Keypair::generate().public_key();
//!     let mut exchange = SignatureExchange::new(Keypair::generate(), SignatureConfig::default());
//!
//!     // Half-signed block, already persisted; send it to the peer
//!     let request = exchange.request(&store, peer, 10, 5, tokio::time::Instant::now()).await?;
//!     assert!(request.is_half_signed());
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod convergence;
pub mod crawl;
pub mod error;
pub mod messages;
pub mod signature;
pub mod transport;

pub use convergence::{compute_chain_digest, verify_convergence, ConvergenceResult};
pub use crawl::{blocks_for_request, crawl_replies, CrawlConfig, CrawlSession, CrawledBlock, Crawler};
pub use error::{ProtocolError, Result};
pub use messages::{limits, LedgerMessage};
pub use signature::{ExchangeState, SignatureConfig, SignatureExchange};
pub use transport::{memory::MemoryNetwork, memory::MemoryTransport, Transport};
