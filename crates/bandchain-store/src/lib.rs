//! # Bandchain Store
//!
//! Storage abstraction for bandchain. Provides a trait-based interface for
//! block persistence with SQLite and in-memory implementations.
//!
//! ## Key Types
//!
//! - [`LedgerStore`] - The async trait for all storage operations
//! - [`LedgerStoreExt`] - Derived queries: totals, latest hash, block shells
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`InsertResult`] - Result of adding a block
//!
//! ## Usage
//!
//! ```rust,no_run
//! use bandchain_store::{LedgerStore, LedgerStoreExt, SqliteStore};
//! use bandchain_core::Keypair;
//!
//! async fn example() -> bandchain_store::Result<()> {
//!     let store = SqliteStore::open("ledger.db")?;
//!     let me = Keypair::generate().public_key();
//!
//!     // None until the first block is signed
//!     let totals = store.get_total(&me).await?;
//!     assert!(totals.is_none());
//!     Ok(())
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Chain entries**: a block is stored once per participant chain
//! - **Idempotent inserts**: adding the same block twice returns `AlreadyExists`
//! - **Completion**: a fully signed block replaces its half-signed original
//! - **Conflicts**: a different block at an occupied position is refused

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use migration::LATEST_DB_VERSION;
pub use sqlite::SqliteStore;
pub use traits::{InsertResult, LedgerStore, LedgerStoreExt, TrustEdge};
