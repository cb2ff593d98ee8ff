//! Database schema versioning for SQLite.
//!
//! The schema version lives in the `option` table under `database_version`.
//! On open:
//! - no marker (version 0): create the current schema
//! - a known older version: migrate forward step by step
//! - a newer version: leave everything untouched and keep that version

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Result, StoreError};

/// Current schema version.
pub const LATEST_DB_VERSION: u32 = 2;

/// Key of the version marker in the `option` table.
pub const VERSION_KEY: &str = "database_version";

/// Initialize or migrate the database schema, returning the version the
/// database is at afterwards.
///
/// This function is idempotent.
pub fn migrate(conn: &mut Connection) -> Result<u32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS option (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    let current = read_version(conn)?;

    if current > LATEST_DB_VERSION {
        tracing::warn!(
            version = current,
            latest = LATEST_DB_VERSION,
            "database is newer than this build, opening without migration"
        );
        return Ok(current);
    }

    if current < LATEST_DB_VERSION {
        let tx = conn.transaction()?;

        if current == 0 {
            apply_migration(&tx, LATEST_DB_VERSION)?;
        } else {
            for version in (current + 1)..=LATEST_DB_VERSION {
                apply_migration(&tx, version)?;
            }
        }
        write_version(&tx, LATEST_DB_VERSION)?;

        tx.commit()?;
        tracing::info!(from = current, to = LATEST_DB_VERSION, "database schema migrated");
    }

    Ok(LATEST_DB_VERSION)
}

/// Read the version marker; 0 when absent.
pub fn read_version(conn: &Connection) -> Result<u32> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM option WHERE key = ?1",
            params![VERSION_KEY],
            |row| row.get(0),
        )
        .optional()?;

    match value {
        None => Ok(0),
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| StoreError::Migration(format!("unreadable database_version: {:?}", v))),
    }
}

/// Overwrite the version marker.
pub fn write_version(conn: &Connection, version: u32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO option (key, value) VALUES (?1, ?2)",
        params![VERSION_KEY, version.to_string()],
    )?;
    Ok(())
}

/// Apply a specific migration version.
fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        2 => apply_v2(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v2: one row per chain entry.
///
/// Version 1 kept a single `multi_chain` table of test data that cannot be
/// mapped onto chain entries; it is dropped.
fn apply_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        DROP TABLE IF EXISTS multi_chain;
        DROP TABLE IF EXISTS blocks;

        -- One row per (block, participant chain)
        CREATE TABLE blocks (
            public_key BLOB NOT NULL,               -- owner of the chain this row belongs to
            sequence_number INTEGER NOT NULL,       -- owner's sequence number in this block
            block_hash BLOB NOT NULL,               -- 32 bytes, Blake3
            public_key_requester BLOB NOT NULL,
            public_key_responder BLOB NOT NULL,
            up INTEGER NOT NULL,
            down INTEGER NOT NULL,
            total_up_requester INTEGER NOT NULL,
            total_down_requester INTEGER NOT NULL,
            total_up_responder INTEGER NOT NULL,
            total_down_responder INTEGER NOT NULL,
            sequence_number_requester INTEGER NOT NULL,
            sequence_number_responder INTEGER NOT NULL,
            previous_hash_requester BLOB NOT NULL,
            previous_hash_responder BLOB NOT NULL,
            signature_requester BLOB,               -- 64 bytes, nullable
            signature_responder BLOB,               -- 64 bytes, nullable until completed
            insert_time INTEGER NOT NULL,           -- Unix ms, UTC, first persistence

            PRIMARY KEY (public_key, sequence_number)
        );

        CREATE INDEX idx_blocks_hash ON blocks(block_hash);
        CREATE INDEX idx_blocks_insert_time ON blocks(public_key, insert_time);
        "#,
    )?;

    Ok(())
}
