//! Pending-bytes accumulator.
//!
//! Raw byte counts observed per peer pile up here between signing rounds. A
//! flush turns them into whole megabytes; the fractional remainder is dropped
//! when an entry is signed, not carried into the next round.

use std::collections::BTreeMap;

use serde::Serialize;

use bandchain_core::PublicKey;

/// Divide by this to convert bytes to megabytes.
pub const MEGA_DIVIDER: u64 = 1024 * 1024;

/// Unsigned traffic with one peer, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PendingBytes {
    pub up: u64,
    pub down: u64,
}

impl PendingBytes {
    pub fn is_zero(&self) -> bool {
        self.up == 0 && self.down == 0
    }

    /// Whole megabytes, remainder dropped.
    pub fn megabytes(&self) -> (u64, u64) {
        (self.up / MEGA_DIVIDER, self.down / MEGA_DIVIDER)
    }
}

/// Per-peer pending bytes. Entries are never removed, only reset.
#[derive(Debug, Default)]
pub struct PendingBytesLedger {
    entries: BTreeMap<PublicKey, PendingBytes>,
}

impl PendingBytesLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one observed transfer to the entry of `identity`.
    pub fn increase(&mut self, identity: PublicKey, up: u64, down: u64) {
        let entry = self.entries.entry(identity).or_default();
        entry.up = entry.up.saturating_add(up);
        entry.down = entry.down.saturating_add(down);
    }

    pub fn get(&self, identity: &PublicKey) -> Option<PendingBytes> {
        self.entries.get(identity).copied()
    }

    /// Zero the entry of `identity`, keeping it for later accumulation.
    pub fn reset(&mut self, identity: &PublicKey) {
        if let Some(entry) = self.entries.get_mut(identity) {
            *entry = PendingBytes::default();
        }
    }

    /// Peers with at least one whole megabyte to sign, with the amounts in
    /// megabytes, in key order.
    pub fn due(&self) -> Vec<(PublicKey, u64, u64)> {
        self.entries
            .iter()
            .filter(|(_, bytes)| !bytes.is_zero())
            .filter_map(|(identity, bytes)| match bytes.megabytes() {
                (0, 0) => None,
                (up, down) => Some((*identity, up, down)),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bandchain_core::Keypair;

    fn peer(seed: u8) -> PublicKey {
        Keypair::from_seed(&[seed; 32]).public_key()
    }

    #[test]
    fn test_increase_accumulates() {
        let mut ledger = PendingBytesLedger::new();
        ledger.increase(peer(1), 10, 20);
        ledger.increase(peer(1), 5, 0);

        assert_eq!(ledger.get(&peer(1)), Some(PendingBytes { up: 15, down: 20 }));
        assert_eq!(ledger.get(&peer(2)), None);
    }

    #[test]
    fn test_due_converts_to_megabytes() {
        let mut ledger = PendingBytesLedger::new();
        ledger.increase(peer(1), 3 * MEGA_DIVIDER + 17, MEGA_DIVIDER - 1);
        ledger.increase(peer(2), 100, 100);

        assert_eq!(ledger.due(), vec![(peer(1), 3, 0)]);
    }

    #[test]
    fn test_reset_keeps_entry() {
        let mut ledger = PendingBytesLedger::new();
        ledger.increase(peer(1), 2 * MEGA_DIVIDER, 0);
        ledger.reset(&peer(1));

        assert_eq!(ledger.get(&peer(1)), Some(PendingBytes::default()));
        assert_eq!(ledger.len(), 1);
        assert!(ledger.due().is_empty());
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn sub_megabyte_deltas_are_never_due(
                deltas in proptest::collection::vec((0u64..4096, 0u64..4096), 0..200),
            ) {
                let mut ledger = PendingBytesLedger::new();
                for (up, down) in deltas {
                    ledger.increase(peer(1), up, down);
                }
                let pending = ledger.get(&peer(1)).unwrap_or_default();
                prop_assume!(pending.up < MEGA_DIVIDER && pending.down < MEGA_DIVIDER);
                prop_assert!(ledger.due().is_empty());
            }

            #[test]
            fn megabytes_never_exceed_bytes(up in any::<u64>(), down in any::<u64>()) {
                let (up_mb, down_mb) = PendingBytes { up, down }.megabytes();
                prop_assert!(up_mb * MEGA_DIVIDER <= up);
                prop_assert!(down_mb * MEGA_DIVIDER <= down);
            }
        }
    }
}
