//! Strong type definitions for bandchain.
//!
//! Identifiers are newtypes so a block hash can never be confused with a key.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;

/// Sequence number of the first block in every chain.
pub const GENESIS_SEQ: u64 = 1;

/// Sequence number of a chain half that has not been assigned yet.
///
/// Also returned by stores as the latest sequence number of an unknown identity.
pub const UNKNOWN_SEQ: u64 = 0;

/// Previous-hash value of the first block in every chain.
pub const GENESIS_ID: BlockHash = BlockHash::ZERO;

/// A 32-byte block hash, computed as Blake3(canonical bytes || signatures).
///
/// This is the primary identity of a block and the value chained through
/// `previous_hash_*` fields.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockHash(pub [u8; 32]);

impl BlockHash {
    /// Create a new BlockHash from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut arr = [0u8; 32];
        hex::decode_to_slice(s, &mut arr)?;
        Ok(Self(arr))
    }

    /// True for the genesis sentinel.
    pub fn is_genesis(&self) -> bool {
        *self == GENESIS_ID
    }

    /// The all-zero hash.
    pub const ZERO: Self = Self([0u8; 32]);
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

impl AsRef<[u8]> for BlockHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for BlockHash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for BlockHash {
    type Error = std::array::TryFromSliceError;

    fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; 32] = slice.try_into()?;
        Ok(Self(arr))
    }
}

/// Cumulative up/down counters of one identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Totals {
    pub up: u64,
    pub down: u64,
}

impl Totals {
    pub const fn new(up: u64, down: u64) -> Self {
        Self { up, down }
    }

    /// Add an interaction, saturating at `u64::MAX`.
    pub fn saturating_add(self, up: u64, down: u64) -> Self {
        Self {
            up: self.up.saturating_add(up),
            down: self.down.saturating_add(down),
        }
    }
}

impl Add for Totals {
    type Output = Totals;

    fn add(self, rhs: Totals) -> Totals {
        self.saturating_add(rhs.up, rhs.down)
    }
}

impl From<(u64, u64)> for Totals {
    fn from((up, down): (u64, u64)) -> Self {
        Self { up, down }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_hash_hex_roundtrip() {
        let hash = BlockHash::from_bytes([0x42; 32]);
        let recovered = BlockHash::from_hex(&hash.to_hex()).unwrap();
        assert_eq!(hash, recovered);
    }

    #[test]
    fn test_block_hash_from_hex_rejects_short_input() {
        assert!(BlockHash::from_hex("abcd").is_err());
    }

    #[test]
    fn test_block_hash_display() {
        let hash = BlockHash::from_bytes([0xab; 32]);
        assert_eq!(format!("{}", hash), "abababababababab");
    }

    #[test]
    fn test_genesis_sentinels() {
        assert!(GENESIS_ID.is_genesis());
        assert!(UNKNOWN_SEQ < GENESIS_SEQ);
    }

    #[test]
    fn test_totals_add_is_saturating() {
        let t = Totals::new(u64::MAX - 1, 10) + Totals::new(5, 5);
        assert_eq!(t, Totals::new(u64::MAX, 15));
    }
}
