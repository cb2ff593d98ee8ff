//! Proptest generators for property-based testing.

use proptest::prelude::*;

use bandchain_core::{Block, BlockHash, Keypair, PublicKey, GENESIS_ID, UNKNOWN_SEQ};

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Generate a random public key that belongs to a real keypair.
pub fn public_key() -> impl Strategy<Value = PublicKey> {
    keypair().prop_map(|kp| kp.public_key())
}

/// Generate a random BlockHash.
pub fn block_hash() -> impl Strategy<Value = BlockHash> {
    any::<[u8; 32]>().prop_map(BlockHash::from_bytes)
}

/// Generate an assigned sequence number.
pub fn seq() -> impl Strategy<Value = u64> {
    1u64..=1_000_000
}

/// Generate an interaction amount in megabytes.
pub fn megabytes() -> impl Strategy<Value = u64> {
    0u64..=100_000
}

/// Parameters for generating a block.
#[derive(Debug, Clone)]
pub struct BlockParams {
    pub requester: Keypair,
    pub responder: Keypair,
    pub up: u64,
    pub down: u64,
    /// Totals of each side before this interaction.
    pub requester_base: (u64, u64),
    pub responder_base: (u64, u64),
    pub sequence_number_requester: u64,
    /// `None` leaves the block half-signed.
    pub sequence_number_responder: Option<u64>,
    pub previous_hash_requester: BlockHash,
    pub previous_hash_responder: BlockHash,
}

impl Arbitrary for BlockParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            (any::<[u8; 32]>(), any::<[u8; 32]>()),
            (megabytes(), megabytes()),
            ((0u64..=1u64 << 40), (0u64..=1u64 << 40)),
            ((0u64..=1u64 << 40), (0u64..=1u64 << 40)),
            seq(),
            proptest::option::of(seq()),
            block_hash(),
            block_hash(),
        )
            .prop_filter("requester and responder must differ", |((a, b), ..)| a != b)
            .prop_map(
                |((ra, rb), (up, down), requester_base, responder_base, sr, sp, pr, pp)| BlockParams {
                    requester: Keypair::from_seed(&ra),
                    responder: Keypair::from_seed(&rb),
                    up,
                    down,
                    requester_base,
                    responder_base,
                    sequence_number_requester: sr,
                    sequence_number_responder: sp,
                    previous_hash_requester: pr,
                    previous_hash_responder: pp,
                },
            )
            .boxed()
    }
}

/// Build a block from parameters, signed by whichever halves are assigned.
pub fn block_from_params(params: &BlockParams) -> Block {
    let mut block = Block::create(None, params.requester.public_key(), params.responder.public_key())
        .with_interaction(params.up, params.down);
    block.total_up_requester = params.requester_base.0 + params.up;
    block.total_down_requester = params.requester_base.1 + params.down;
    block.sequence_number_requester = params.sequence_number_requester;
    block.previous_hash_requester = params.previous_hash_requester;
    block.sign_as_requester(&params.requester);

    if let Some(seq) = params.sequence_number_responder {
        block.total_up_responder = params.responder_base.0 + params.down;
        block.total_down_responder = params.responder_base.1 + params.up;
        block.sequence_number_responder = seq;
        block.previous_hash_responder = params.previous_hash_responder;
        block.signature_responder = Some(params.responder.sign(&block.canonical_encode()));
    } else {
        block.sequence_number_responder = UNKNOWN_SEQ;
        block.previous_hash_responder = GENESIS_ID;
    }
    block
}
