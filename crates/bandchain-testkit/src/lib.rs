//! # Bandchain Testkit
//!
//! Testing utilities for Bandchain.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: Fixed-seed blocks whose encoding and hash must never change
//! - **Generators**: Proptest strategies for property-based testing
//! - **Fixtures**: An identity with its own store, for building chains by hand
//! - **Simulation**: Several full nodes on one in-memory network
//!
//! ## Golden Vectors
//!
//! ```rust
//! use bandchain_testkit::vectors::{all_vectors, block_from_vector};
//!
//! for vector in all_vectors() {
//!     let block = block_from_vector(&vector);
//!     println!("{}: {}", vector.name, block.compute_hash().to_hex());
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use bandchain_testkit::generators::{block_from_params, BlockParams};
//!
//! proptest! {
//!     #[test]
//!     fn hash_is_deterministic(params: BlockParams) {
//!         let b1 = block_from_params(&params);
//!         let b2 = block_from_params(&params);
//!         prop_assert_eq!(b1.compute_hash(), b2.compute_hash());
//!     }
//! }
//! ```
//!
//! ## Simulation
//!
//! ```rust,no_run
//! use bandchain_testkit::Simulation;
//!
//! async fn example() -> anyhow::Result<()> {
//!     let mut sim = Simulation::new(3).await;
//!     sim.sign(0, 1, 10, 5).await?;
//!     sim.crawl(2, 0).await?;
//!     assert!(sim.converged(0).await?);
//!     Ok(())
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod simulation;
pub mod vectors;

pub use fixtures::{multi_party_fixtures, sign_between, TestFixture};
pub use generators::{block_from_params, BlockParams};
pub use simulation::Simulation;
pub use vectors::{all_vectors, block_from_vector, verify_all_vectors, GoldenVector};
