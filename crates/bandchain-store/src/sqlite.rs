//! SQLite implementation of the LedgerStore trait.
//!
//! This is the primary storage backend. It uses rusqlite with bundled SQLite,
//! wrapped in async via tokio::spawn_blocking. One mutex-guarded connection
//! serializes every write, so two writers never interleave on a chain.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use bandchain_core::{Block, BlockHash, PublicKey, Signature};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{
    now_millis, resolve_slot, summarize, InsertResult, LedgerStore, SlotAction, TrustEdge,
};

/// Columns read back into a [`Block`], in `row_to_block` order.
const BLOCK_COLUMNS: &str = "public_key_requester, public_key_responder, up, down,
    total_up_requester, total_down_requester, total_up_responder, total_down_responder,
    sequence_number_requester, sequence_number_responder,
    previous_hash_requester, previous_hash_responder,
    signature_requester, signature_responder, insert_time";

/// SQLite-based store implementation.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    version: u32,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file (and missing parent directories) and runs migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Self::from_connection(Connection::open(path)?)
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        let version = migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            version,
        })
    }

    /// Schema version the database was opened at.
    pub fn database_version(&self) -> u32 {
        self.version
    }

    /// Run `f` against the connection on the blocking pool.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut conn)
        })
        .await?
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row mapping
// ─────────────────────────────────────────────────────────────────────────────

fn blob<const N: usize>(row: &Row<'_>, idx: usize) -> rusqlite::Result<[u8; N]> {
    let bytes: Vec<u8> = row.get(idx)?;
    bytes
        .try_into()
        .map_err(|_| rusqlite::Error::InvalidColumnType(idx, format!("blob{}", N), Type::Blob))
}

fn uint(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let v: i64 = row.get(idx)?;
    u64::try_from(v).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
}

fn signature(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Signature>> {
    let bytes: Option<Vec<u8>> = row.get(idx)?;
    bytes
        .map(|b| {
            Signature::try_from(b.as_slice())
                .map_err(|_| rusqlite::Error::InvalidColumnType(idx, "signature".into(), Type::Blob))
        })
        .transpose()
}

fn row_to_block(row: &Row<'_>) -> rusqlite::Result<Block> {
    Ok(Block {
        public_key_requester: PublicKey(blob(row, 0)?),
        public_key_responder: PublicKey(blob(row, 1)?),
        up: uint(row, 2)?,
        down: uint(row, 3)?,
        total_up_requester: uint(row, 4)?,
        total_down_requester: uint(row, 5)?,
        total_up_responder: uint(row, 6)?,
        total_down_responder: uint(row, 7)?,
        sequence_number_requester: uint(row, 8)?,
        sequence_number_responder: uint(row, 9)?,
        previous_hash_requester: BlockHash(blob(row, 10)?),
        previous_hash_responder: BlockHash(blob(row, 11)?),
        signature_requester: signature(row, 12)?,
        signature_responder: signature(row, 13)?,
        insert_time: Some(row.get(14)?),
    })
}

fn to_sql_int(value: u64, field: &str) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| StoreError::InvalidData(format!("{} {} exceeds storable range", field, value)))
}

fn select_one(conn: &Connection, filter: &str, args: impl rusqlite::Params) -> Result<Option<Block>> {
    let sql = format!("SELECT {} FROM blocks WHERE {}", BLOCK_COLUMNS, filter);
    Ok(conn.query_row(&sql, args, row_to_block).optional()?)
}

fn select_many(conn: &Connection, filter: &str, args: impl rusqlite::Params) -> Result<Vec<Block>> {
    let sql = format!("SELECT {} FROM blocks WHERE {}", BLOCK_COLUMNS, filter);
    let mut stmt = conn.prepare(&sql)?;
    let blocks = stmt
        .query_map(args, row_to_block)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(blocks)
}

fn insert_row(
    conn: &Connection,
    owner: &PublicKey,
    sequence_number: u64,
    hash: &BlockHash,
    block: &Block,
    insert_time: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO blocks (
            public_key, sequence_number, block_hash,
            public_key_requester, public_key_responder, up, down,
            total_up_requester, total_down_requester, total_up_responder, total_down_responder,
            sequence_number_requester, sequence_number_responder,
            previous_hash_requester, previous_hash_responder,
            signature_requester, signature_responder, insert_time
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
        params![
            owner.as_bytes().as_slice(),
            to_sql_int(sequence_number, "sequence_number")?,
            hash.as_bytes().as_slice(),
            block.public_key_requester.as_bytes().as_slice(),
            block.public_key_responder.as_bytes().as_slice(),
            to_sql_int(block.up, "up")?,
            to_sql_int(block.down, "down")?,
            to_sql_int(block.total_up_requester, "total_up_requester")?,
            to_sql_int(block.total_down_requester, "total_down_requester")?,
            to_sql_int(block.total_up_responder, "total_up_responder")?,
            to_sql_int(block.total_down_responder, "total_down_responder")?,
            to_sql_int(block.sequence_number_requester, "sequence_number_requester")?,
            to_sql_int(block.sequence_number_responder, "sequence_number_responder")?,
            block.previous_hash_requester.as_bytes().as_slice(),
            block.previous_hash_responder.as_bytes().as_slice(),
            block.signature_requester.as_ref().map(|s| s.as_bytes().to_vec()),
            block.signature_responder.as_ref().map(|s| s.as_bytes().to_vec()),
            insert_time,
        ],
    )?;
    Ok(())
}

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn add_block(&self, block: &Block) -> Result<InsertResult> {
        let block = block.clone();

        self.run(move |conn| {
            let hash = block.compute_hash();
            let tx = conn.transaction()?;

            let mut plan = Vec::with_capacity(2);
            for owner in block.chain_owners() {
                let seq = block
                    .sequence_number_for(&owner)
                    .ok_or_else(|| StoreError::InvalidData("owner without sequence number".into()))?;
                let existing = select_one(
                    &tx,
                    "public_key = ?1 AND sequence_number = ?2",
                    params![owner.as_bytes().as_slice(), to_sql_int(seq, "sequence_number")?],
                )?;

                let action = resolve_slot(&block, &hash, existing.as_ref());
                if let SlotAction::Conflict(existing) = action {
                    return Ok(InsertResult::Conflict { existing });
                }
                plan.push((owner, seq, action, existing.and_then(|b| b.insert_time)));
            }

            let now = now_millis();
            for (owner, seq, action, previous_time) in &plan {
                match action {
                    SlotAction::Insert => insert_row(&tx, owner, *seq, &hash, &block, now)?,
                    SlotAction::Replace => {
                        tx.execute(
                            "DELETE FROM blocks WHERE public_key = ?1 AND sequence_number = ?2",
                            params![owner.as_bytes().as_slice(), to_sql_int(*seq, "sequence_number")?],
                        )?;
                        insert_row(&tx, owner, *seq, &hash, &block, previous_time.unwrap_or(now))?;
                    }
                    SlotAction::Keep | SlotAction::Conflict(_) => {}
                }
            }

            tx.commit()?;
            let actions: Vec<SlotAction> = plan.iter().map(|(_, _, a, _)| *a).collect();
            Ok(summarize(&actions))
        })
        .await
    }

    async fn contains(&self, hash: &BlockHash) -> Result<bool> {
        let hash = *hash;
        self.run(move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM blocks WHERE block_hash = ?1 LIMIT 1",
                    params![hash.as_bytes().as_slice()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn get_block(&self, hash: &BlockHash) -> Result<Option<Block>> {
        let hash = *hash;
        self.run(move |conn| {
            select_one(conn, "block_hash = ?1 LIMIT 1", params![hash.as_bytes().as_slice()])
        })
        .await
    }

    async fn get_latest(&self, identity: &PublicKey) -> Result<Option<Block>> {
        let identity = *identity;
        self.run(move |conn| {
            select_one(
                conn,
                "public_key = ?1 ORDER BY sequence_number DESC LIMIT 1",
                params![identity.as_bytes().as_slice()],
            )
        })
        .await
    }

    async fn get_by_identity_and_sequence_number(
        &self,
        identity: &PublicKey,
        sequence_number: u64,
    ) -> Result<Option<Block>> {
        let identity = *identity;
        self.run(move |conn| {
            select_one(
                conn,
                "public_key = ?1 AND sequence_number = ?2",
                params![identity.as_bytes().as_slice(), to_sql_int(sequence_number, "sequence_number")?],
            )
        })
        .await
    }

    async fn get_blocks_since(&self, identity: &PublicKey, seq: u64) -> Result<Vec<Block>> {
        let identity = *identity;
        self.run(move |conn| {
            select_many(
                conn,
                "public_key = ?1 AND sequence_number >= ?2 ORDER BY sequence_number ASC",
                params![identity.as_bytes().as_slice(), to_sql_int(seq, "sequence_number")?],
            )
        })
        .await
    }

    async fn get_blocks_until(&self, identity: &PublicKey, seq: u64) -> Result<Vec<Block>> {
        let identity = *identity;
        // Anything above i64::MAX is "everything".
        let bound = i64::try_from(seq).unwrap_or(i64::MAX);
        self.run(move |conn| {
            select_many(
                conn,
                "public_key = ?1 AND sequence_number <= ?2 ORDER BY sequence_number ASC",
                params![identity.as_bytes().as_slice(), bound],
            )
        })
        .await
    }

    async fn get_block_before(&self, block: &Block, identity: &PublicKey) -> Result<Option<Block>> {
        let Some(seq) = block.sequence_number_for(identity) else {
            return Ok(None);
        };
        let identity = *identity;
        self.run(move |conn| {
            select_one(
                conn,
                "public_key = ?1 AND sequence_number < ?2 ORDER BY sequence_number DESC LIMIT 1",
                params![identity.as_bytes().as_slice(), to_sql_int(seq, "sequence_number")?],
            )
        })
        .await
    }

    async fn get_block_after(&self, block: &Block, identity: &PublicKey) -> Result<Option<Block>> {
        let Some(seq) = block.sequence_number_for(identity) else {
            return Ok(None);
        };
        let identity = *identity;
        self.run(move |conn| {
            select_one(
                conn,
                "public_key = ?1 AND sequence_number > ?2 ORDER BY sequence_number ASC LIMIT 1",
                params![identity.as_bytes().as_slice(), to_sql_int(seq, "sequence_number")?],
            )
        })
        .await
    }

    async fn get_linked(&self, block: &Block, identity: &PublicKey) -> Result<Option<Block>> {
        let Some(counterparty) = block.counterparty(identity) else {
            return Ok(None);
        };
        let hash = block.compute_hash();
        self.run(move |conn| {
            select_one(
                conn,
                "public_key = ?1 AND block_hash = ?2",
                params![counterparty.as_bytes().as_slice(), hash.as_bytes().as_slice()],
            )
        })
        .await
    }

    async fn get_recent_blocks(&self, identity: &PublicKey, limit: usize) -> Result<Vec<Block>> {
        let identity = *identity;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.run(move |conn| {
            select_many(
                conn,
                "public_key = ?1 ORDER BY sequence_number DESC LIMIT ?2",
                params![identity.as_bytes().as_slice(), limit],
            )
        })
        .await
    }

    async fn count_blocks(&self, identity: &PublicKey) -> Result<u64> {
        let identity = *identity;
        self.run(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM blocks WHERE public_key = ?1",
                params![identity.as_bytes().as_slice()],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
        .await
    }

    async fn total_block_count(&self) -> Result<u64> {
        self.run(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM blocks", [], |row| row.get(0))?;
            Ok(count as u64)
        })
        .await
    }

    async fn get_trust_edges(&self, identity: &PublicKey) -> Result<Vec<TrustEdge>> {
        let identity = *identity;
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT CASE WHEN public_key_requester = public_key
                            THEN public_key_responder ELSE public_key_requester END AS counterparty,
                        COUNT(*), MAX(insert_time)
                 FROM blocks WHERE public_key = ?1
                 GROUP BY counterparty
                 ORDER BY COUNT(*) DESC, counterparty ASC",
            )?;

            let edges = stmt
                .query_map(params![identity.as_bytes().as_slice()], |row| {
                    let count: i64 = row.get(1)?;
                    Ok(TrustEdge {
                        counterparty: PublicKey(blob(row, 0)?),
                        block_count: count as u64,
                        last_block_time: row.get(2)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(edges)
        })
        .await
    }
}
