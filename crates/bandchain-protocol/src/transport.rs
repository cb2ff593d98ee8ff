//! Transport abstraction for the ledger protocol.
//!
//! Peer discovery and the real network live outside this crate; a node only
//! needs to send a message to an identity and receive the next message
//! addressed to it.

use std::time::Duration;

use async_trait::async_trait;

use bandchain_core::PublicKey;

use crate::error::Result;
use crate::messages::LedgerMessage;

/// Transport trait for sending and receiving ledger messages.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a message to a specific peer.
    async fn send(&self, peer: &PublicKey, message: LedgerMessage) -> Result<()>;

    /// Receive the next message from any peer.
    ///
    /// Returns the sender's identity and the message.
    async fn recv(&self) -> Result<(PublicKey, LedgerMessage)>;

    /// Receive with timeout.
    ///
    /// Returns None if the timeout expires before a message arrives.
    async fn recv_timeout(&self, timeout: Duration) -> Result<Option<(PublicKey, LedgerMessage)>>;

    /// The local node's identity.
    fn local_id(&self) -> PublicKey;

    /// Currently reachable peers.
    async fn connected_peers(&self) -> Result<Vec<PublicKey>>;

    /// Check if a specific peer is reachable.
    async fn is_connected(&self, peer: &PublicKey) -> bool;
}

/// In-memory transport for tests and simulations.
///
/// Messages go through the wire codec on every hop, so whatever the memory
/// network delivers would also survive a real network.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    use bytes::Bytes;
    use tokio::sync::{mpsc, Mutex, RwLock};

    use crate::codec;
    use crate::error::ProtocolError;

    const CHANNEL_CAPACITY: usize = 1024;

    #[derive(Debug)]
    struct Envelope {
        from: PublicKey,
        payload: Bytes,
    }

    /// Shared routing table of the memory network.
    #[derive(Default)]
    pub struct MemoryNetwork {
        senders: RwLock<HashMap<PublicKey, mpsc::Sender<Envelope>>>,
    }

    impl MemoryNetwork {
        /// Create a new memory network.
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Create a transport for `id` connected to this network.
        pub async fn create_transport(self: &Arc<Self>, id: PublicKey) -> MemoryTransport {
            let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
            self.senders.write().await.insert(id, tx);

            MemoryTransport {
                id,
                network: Arc::clone(self),
                receiver: Mutex::new(rx),
            }
        }

        /// Take `id` off the network. Later sends to it fail.
        pub async fn disconnect(&self, id: &PublicKey) {
            self.senders.write().await.remove(id);
        }
    }

    /// In-memory transport implementation.
    pub struct MemoryTransport {
        id: PublicKey,
        network: Arc<MemoryNetwork>,
        receiver: Mutex<mpsc::Receiver<Envelope>>,
    }

    impl MemoryTransport {
        fn open(envelope: Envelope) -> Result<(PublicKey, LedgerMessage)> {
            Ok((envelope.from, codec::decode(&envelope.payload)?))
        }
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn send(&self, peer: &PublicKey, message: LedgerMessage) -> Result<()> {
            let payload = codec::encode(&message)?;
            let sender = self
                .network
                .senders
                .read()
                .await
                .get(peer)
                .cloned()
                .ok_or(ProtocolError::PeerNotConnected(*peer))?;

            sender
                .send(Envelope { from: self.id, payload })
                .await
                .map_err(|_| ProtocolError::TransportError("peer disconnected".into()))
        }

        async fn recv(&self) -> Result<(PublicKey, LedgerMessage)> {
            let mut rx = self.receiver.lock().await;
            match rx.recv().await {
                Some(envelope) => Self::open(envelope),
                None => Err(ProtocolError::TransportError("channel closed".into())),
            }
        }

        async fn recv_timeout(&self, timeout: Duration) -> Result<Option<(PublicKey, LedgerMessage)>> {
            let mut rx = self.receiver.lock().await;
            match tokio::time::timeout(timeout, rx.recv()).await {
                Ok(Some(envelope)) => Self::open(envelope).map(Some),
                Ok(None) => Err(ProtocolError::TransportError("channel closed".into())),
                Err(_) => Ok(None),
            }
        }

        fn local_id(&self) -> PublicKey {
            self.id
        }

        async fn connected_peers(&self) -> Result<Vec<PublicKey>> {
            let senders = self.network.senders.read().await;
            Ok(senders.keys().filter(|id| **id != self.id).copied().collect())
        }

        async fn is_connected(&self, peer: &PublicKey) -> bool {
            self.network.senders.read().await.contains_key(peer)
        }
    }
}
