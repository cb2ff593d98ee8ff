//! CBOR framing of [`LedgerMessage`]s.
//!
//! Every message crossing a transport is encoded here, so size limits are
//! enforced in one place for both directions.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, Result};
use crate::messages::{limits, LedgerMessage};

/// Encode a message, refusing anything above [`limits::MAX_MESSAGE_SIZE`].
pub fn encode(message: &LedgerMessage) -> Result<Bytes> {
    let mut writer = BytesMut::with_capacity(512).writer();
    ciborium::into_writer(message, &mut writer)
        .map_err(|e| ProtocolError::Codec(e.to_string()))?;

    let bytes = writer.into_inner().freeze();
    check_size(bytes.len())?;
    Ok(bytes)
}

/// Decode a message previously produced by [`encode`].
pub fn decode(bytes: &[u8]) -> Result<LedgerMessage> {
    check_size(bytes.len())?;
    ciborium::from_reader(bytes).map_err(|e| ProtocolError::Codec(e.to_string()))
}

fn check_size(size: usize) -> Result<()> {
    if size > limits::MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size,
            max: limits::MAX_MESSAGE_SIZE,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bandchain_core::{Block, Keypair};

    fn full_block() -> Block {
        let a = Keypair::from_seed(&[1; 32]);
        let b = Keypair::from_seed(&[2; 32]);
        let mut request = Block::create(None, a.public_key(), b.public_key()).with_interaction(10, 5);
        request.sign_as_requester(&a);
        request.countersign(None, &b)
    }

    #[test]
    fn test_signature_message_survives_the_wire() {
        let block = full_block();
        let msg = LedgerMessage::Signature { block: block.clone() };

        let decoded = decode(&encode(&msg).unwrap()).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.block().unwrap().compute_hash(), block.compute_hash());
    }

    #[test]
    fn test_decoded_block_has_no_insert_time() {
        let mut block = full_block();
        block.insert_time = Some(1_700_000_000_000);
        let bytes = encode(&LedgerMessage::CrawlResponse { block }).unwrap();

        match decode(&bytes).unwrap() {
            LedgerMessage::CrawlResponse { block } => assert_eq!(block.insert_time, None),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(decode(&[0xff, 0x00, 0x13]), Err(ProtocolError::Codec(_))));
    }

    #[test]
    fn test_oversized_input_is_rejected() {
        let big = vec![0u8; limits::MAX_MESSAGE_SIZE + 1];
        assert!(matches!(
            decode(&big),
            Err(ProtocolError::MessageTooLarge { max: limits::MAX_MESSAGE_SIZE, .. })
        ));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn arbitrary_bytes_never_panic(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
                let _ = decode(&bytes);
            }

            #[test]
            fn crawl_request_keeps_sequence_number(seq in any::<u64>()) {
                let msg = LedgerMessage::CrawlRequest { requested_sequence_number: seq };
                prop_assert_eq!(decode(&encode(&msg).unwrap()).unwrap(), msg);
            }
        }
    }
}
