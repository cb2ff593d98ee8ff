//! Block: one signed two-party bandwidth interaction.
//!
//! A block sits in two chains at once, the requester's and the responder's.
//! Each side contributes its own half (totals, sequence number, previous
//! hash) and its own signature. Until the responder has signed, the block is
//! *half-signed* and its responder half holds placeholder values.

use serde::{Deserialize, Serialize};

use crate::canonical::{block_hash, canonical_block_bytes};
use crate::crypto::{Keypair, PublicKey, Signature};
use crate::error::ChainError;
use crate::types::{BlockHash, Totals, GENESIS_ID, GENESIS_SEQ, UNKNOWN_SEQ};

/// The part an identity played in a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Requester,
    Responder,
}

/// A block of the bandwidth ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub public_key_requester: PublicKey,
    pub public_key_responder: PublicKey,

    /// Amount the requester sent to the responder in this interaction.
    pub up: u64,
    /// Amount the requester received from the responder in this interaction.
    pub down: u64,

    pub total_up_requester: u64,
    pub total_down_requester: u64,
    pub total_up_responder: u64,
    pub total_down_responder: u64,

    pub sequence_number_requester: u64,
    pub sequence_number_responder: u64,

    pub previous_hash_requester: BlockHash,
    pub previous_hash_responder: BlockHash,

    /// Signature over [`Block::request_bytes`].
    pub signature_requester: Option<Signature>,
    /// Signature over [`Block::canonical_encode`] of the completed block.
    pub signature_responder: Option<Signature>,

    /// Unix milliseconds of first local persistence. Set by the store.
    #[serde(skip)]
    pub insert_time: Option<i64>,
}

// Equality ignores insert_time, which differs between stores holding the
// same block.
impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.public_key_requester == other.public_key_requester
            && self.public_key_responder == other.public_key_responder
            && self.up == other.up
            && self.down == other.down
            && self.total_up_requester == other.total_up_requester
            && self.total_down_requester == other.total_down_requester
            && self.total_up_responder == other.total_up_responder
            && self.total_down_responder == other.total_down_responder
            && self.sequence_number_requester == other.sequence_number_requester
            && self.sequence_number_responder == other.sequence_number_responder
            && self.previous_hash_requester == other.previous_hash_requester
            && self.previous_hash_responder == other.previous_hash_responder
            && self.signature_requester == other.signature_requester
            && self.signature_responder == other.signature_responder
    }
}

impl Eq for Block {}

impl Block {
    // ─────────────────────────────────────────────────────────────────────────
    // Construction
    // ─────────────────────────────────────────────────────────────────────────

    /// Build the requester-side shell of a new block.
    ///
    /// `latest` is the requester's most recent block, if any. The shell
    /// carries the requester's current totals, the next sequence number and
    /// the hash of `latest` (or the genesis values). The responder half is
    /// left unassigned.
    pub fn create(latest: Option<&Block>, requester: PublicKey, responder: PublicKey) -> Block {
        let (totals, sequence_number, previous_hash) = next_position(latest, &requester);

        Block {
            public_key_requester: requester,
            public_key_responder: responder,
            up: 0,
            down: 0,
            total_up_requester: totals.up,
            total_down_requester: totals.down,
            total_up_responder: 0,
            total_down_responder: 0,
            sequence_number_requester: sequence_number,
            sequence_number_responder: UNKNOWN_SEQ,
            previous_hash_requester: previous_hash,
            previous_hash_responder: GENESIS_ID,
            signature_requester: None,
            signature_responder: None,
            insert_time: None,
        }
    }

    /// Record an interaction on a shell, advancing the requester totals.
    pub fn with_interaction(mut self, up: u64, down: u64) -> Block {
        self.up = up;
        self.down = down;
        self.total_up_requester = self.total_up_requester.saturating_add(up);
        self.total_down_requester = self.total_down_requester.saturating_add(down);
        self
    }

    /// Sign the requester half with `keypair`.
    pub fn sign_as_requester(&mut self, keypair: &Keypair) {
        self.signature_requester = Some(keypair.sign(&self.request_bytes()));
    }

    /// Complete a request as the responder.
    ///
    /// `latest` is the responder's most recent block, if any. The responder's
    /// totals advance by the reversed interaction: its up is the requester's
    /// down and vice versa.
    pub fn countersign(&self, latest: Option<&Block>, keypair: &Keypair) -> Block {
        let responder = keypair.public_key();
        let (totals, sequence_number, previous_hash) = next_position(latest, &responder);
        let totals = totals.saturating_add(self.down, self.up);

        let mut block = self.clone();
        block.public_key_responder = responder;
        block.total_up_responder = totals.up;
        block.total_down_responder = totals.down;
        block.sequence_number_responder = sequence_number;
        block.previous_hash_responder = previous_hash;
        block.signature_responder = Some(keypair.sign(&block.canonical_encode()));
        block.insert_time = None;
        block
    }

    /// The same block with the responder half reset to placeholders.
    pub fn requester_half(&self) -> Block {
        let mut half = self.clone();
        half.total_up_responder = 0;
        half.total_down_responder = 0;
        half.sequence_number_responder = UNKNOWN_SEQ;
        half.previous_hash_responder = GENESIS_ID;
        half.signature_responder = None;
        half
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Encoding
    // ─────────────────────────────────────────────────────────────────────────

    /// Deterministic encoding of every field except signatures and insert time.
    pub fn canonical_encode(&self) -> Vec<u8> {
        canonical_block_bytes(self)
    }

    /// Payload signed by the requester.
    pub fn request_bytes(&self) -> Vec<u8> {
        if self.has_responder_half() {
            self.requester_half().canonical_encode()
        } else {
            self.canonical_encode()
        }
    }

    /// Hash over the canonical encoding and every present signature.
    pub fn compute_hash(&self) -> BlockHash {
        block_hash(self)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn is_half_signed(&self) -> bool {
        self.signature_requester.is_some() && self.signature_responder.is_none()
    }

    pub fn is_fully_signed(&self) -> bool {
        self.signature_requester.is_some() && self.signature_responder.is_some()
    }

    /// True once the responder has filled in its half.
    pub fn has_responder_half(&self) -> bool {
        self.sequence_number_responder != UNKNOWN_SEQ
    }

    pub fn role_of(&self, identity: &PublicKey) -> Option<Role> {
        if self.public_key_requester == *identity {
            Some(Role::Requester)
        } else if self.public_key_responder == *identity {
            Some(Role::Responder)
        } else {
            None
        }
    }

    /// The other participant, seen from `identity`.
    pub fn counterparty(&self, identity: &PublicKey) -> Option<PublicKey> {
        match self.role_of(identity)? {
            Role::Requester => Some(self.public_key_responder),
            Role::Responder => Some(self.public_key_requester),
        }
    }

    pub fn sequence_number_for(&self, identity: &PublicKey) -> Option<u64> {
        match self.role_of(identity)? {
            Role::Requester => Some(self.sequence_number_requester),
            Role::Responder => Some(self.sequence_number_responder),
        }
    }

    pub fn previous_hash_for(&self, identity: &PublicKey) -> Option<BlockHash> {
        match self.role_of(identity)? {
            Role::Requester => Some(self.previous_hash_requester),
            Role::Responder => Some(self.previous_hash_responder),
        }
    }

    pub fn totals_for(&self, identity: &PublicKey) -> Option<Totals> {
        match self.role_of(identity)? {
            Role::Requester => Some(Totals::new(self.total_up_requester, self.total_down_requester)),
            Role::Responder => Some(Totals::new(self.total_up_responder, self.total_down_responder)),
        }
    }

    /// This interaction's up/down from the point of view of `identity`.
    pub fn delta_for(&self, identity: &PublicKey) -> Option<Totals> {
        match self.role_of(identity)? {
            Role::Requester => Some(Totals::new(self.up, self.down)),
            Role::Responder => Some(Totals::new(self.down, self.up)),
        }
    }

    /// Chains this block is placed in: the requester's always, the
    /// responder's once its half is assigned.
    pub fn chain_owners(&self) -> Vec<PublicKey> {
        if self.has_responder_half() {
            vec![self.public_key_requester, self.public_key_responder]
        } else {
            vec![self.public_key_requester]
        }
    }

    /// True when both blocks carry the same requester half, which is what a
    /// completed block must share with the request it answers.
    pub fn same_request(&self, other: &Block) -> bool {
        self.public_key_requester == other.public_key_requester
            && self.public_key_responder == other.public_key_responder
            && self.up == other.up
            && self.down == other.down
            && self.total_up_requester == other.total_up_requester
            && self.total_down_requester == other.total_down_requester
            && self.sequence_number_requester == other.sequence_number_requester
            && self.previous_hash_requester == other.previous_hash_requester
            && self.signature_requester == other.signature_requester
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Chain validation
    // ─────────────────────────────────────────────────────────────────────────

    /// Check that this block extends `previous` in the chain of `identity`.
    ///
    /// `previous` is `None` for the first block of the chain.
    pub fn validate_against(
        &self,
        previous: Option<&Block>,
        identity: &PublicKey,
    ) -> Result<(), ChainError> {
        let not_participant = || ChainError::NotParticipant { identity: *identity };

        let got_seq = self.sequence_number_for(identity).ok_or_else(not_participant)?;
        if got_seq == UNKNOWN_SEQ {
            return Err(not_participant());
        }
        let delta = self.delta_for(identity).ok_or_else(not_participant)?;

        let (expected_seq, expected_hash, base) = match previous {
            None => (GENESIS_SEQ, GENESIS_ID, Totals::default()),
            Some(prev) => (
                prev.sequence_number_for(identity)
                    .ok_or_else(not_participant)?
                    .saturating_add(1),
                prev.compute_hash(),
                prev.totals_for(identity).ok_or_else(not_participant)?,
            ),
        };

        if got_seq != expected_seq {
            return Err(ChainError::SequenceGap {
                expected: expected_seq,
                got: got_seq,
            });
        }

        let got_hash = self.previous_hash_for(identity).ok_or_else(not_participant)?;
        if got_hash != expected_hash {
            return Err(ChainError::HashMismatch {
                expected: expected_hash,
                got: got_hash,
            });
        }

        let expected = base + delta;
        let got = self.totals_for(identity).ok_or_else(not_participant)?;
        if got != expected {
            return Err(ChainError::TotalMismatch {
                expected_up: expected.up,
                expected_down: expected.down,
                got_up: got.up,
                got_down: got.down,
            });
        }

        Ok(())
    }
}

/// Totals, sequence number and previous hash following `latest` in the
/// chain of `identity`.
fn next_position(latest: Option<&Block>, identity: &PublicKey) -> (Totals, u64, BlockHash) {
    match latest {
        Some(block) => (
            block.totals_for(identity).unwrap_or_default(),
            block
                .sequence_number_for(identity)
                .unwrap_or(UNKNOWN_SEQ)
                .saturating_add(1),
            block.compute_hash(),
        ),
        None => (Totals::default(), GENESIS_SEQ, GENESIS_ID),
    }
}
