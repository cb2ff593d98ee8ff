//! Transfer events and the subscription that feeds them to a node.
//!
//! The overlay reports finished circuits, relays and exit sockets. Each kind
//! counts its traffic under different names; [`TransferStats`] is the only
//! view of them the accounting needs.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use bandchain_core::PublicKey;

use crate::error::NodeError;

/// Byte counts of one finished transfer and the peer it was exchanged with.
pub trait TransferStats {
    /// Bytes sent to the peer.
    fn bytes_up(&self) -> u64;
    /// Bytes received from the peer.
    fn bytes_down(&self) -> u64;
    /// Identity of the peer, if the overlay could resolve it.
    fn peer_identity(&self) -> Option<PublicKey>;
}

/// A finished transfer reported by the overlay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransferEvent {
    /// A circuit we built; the peer is its first hop.
    Circuit {
        peer: Option<PublicKey>,
        bytes_up: u64,
        bytes_down: u64,
    },
    /// Traffic we relayed for someone else.
    Relay {
        peer: Option<PublicKey>,
        bytes_relay_up: u64,
        bytes_relay_down: u64,
    },
    /// Traffic leaving the overlay through us.
    ExitSocket {
        peer: Option<PublicKey>,
        bytes_exit: u64,
        bytes_enter: u64,
    },
}

impl TransferStats for TransferEvent {
    fn bytes_up(&self) -> u64 {
        match self {
            TransferEvent::Circuit { bytes_up, .. } => *bytes_up,
            TransferEvent::Relay { bytes_relay_up, .. } => *bytes_relay_up,
            TransferEvent::ExitSocket { bytes_exit, .. } => *bytes_exit,
        }
    }

    fn bytes_down(&self) -> u64 {
        match self {
            TransferEvent::Circuit { bytes_down, .. } => *bytes_down,
            TransferEvent::Relay { bytes_relay_down, .. } => *bytes_relay_down,
            TransferEvent::ExitSocket { bytes_enter, .. } => *bytes_enter,
        }
    }

    fn peer_identity(&self) -> Option<PublicKey> {
        match self {
            TransferEvent::Circuit { peer, .. }
            | TransferEvent::Relay { peer, .. }
            | TransferEvent::ExitSocket { peer, .. } => *peer,
        }
    }
}

/// Loosely typed transfer report, as handed over by collaborators that only
/// know a kind name and a bag of counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub kind: String,
    pub peer: Option<PublicKey>,
    pub stats: BTreeMap<String, u64>,
}

impl TransferRecord {
    fn stat(&self, name: &str) -> u64 {
        self.stats.get(name).copied().unwrap_or(0)
    }
}

impl TryFrom<TransferRecord> for TransferEvent {
    type Error = NodeError;

    fn try_from(record: TransferRecord) -> Result<Self, Self::Error> {
        let peer = record.peer;
        match record.kind.as_str() {
            "circuit" => Ok(TransferEvent::Circuit {
                peer,
                bytes_up: record.stat("bytes_up"),
                bytes_down: record.stat("bytes_down"),
            }),
            "relay" => Ok(TransferEvent::Relay {
                peer,
                bytes_relay_up: record.stat("bytes_relay_up"),
                bytes_relay_down: record.stat("bytes_relay_down"),
            }),
            "exit_socket" => Ok(TransferEvent::ExitSocket {
                peer,
                bytes_exit: record.stat("bytes_exit"),
                bytes_enter: record.stat("bytes_enter"),
            }),
            _ => Err(NodeError::UnknownTransferKind(record.kind)),
        }
    }
}

/// Everything a node can be told by the outside world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    Transfer(TransferEvent),
    TransferRecord(TransferRecord),
    /// The overlay introduced a peer we had not seen before.
    PeerIntroduced(PublicKey),
}

// ─────────────────────────────────────────────────────────────────────────────
// Event bus
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: HashMap<u64, mpsc::UnboundedSender<NodeEvent>>,
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Fan-out of [`NodeEvent`]s to registered subscriptions.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscription.
    pub fn subscribe(&self) -> EventSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = lock(&self.registry);
        let id = registry.next_id;
        registry.next_id += 1;
        registry.subscribers.insert(id, tx);

        EventSubscription {
            id,
            receiver: rx,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Deliver `event` to every subscription, returning how many got it.
    pub fn publish(&self, event: NodeEvent) -> usize {
        let mut registry = lock(&self.registry);
        registry
            .subscribers
            .retain(|_, tx| tx.send(event.clone()).is_ok());
        registry.subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.registry).subscribers.len()
    }
}

/// Receiving end of an [`EventBus`] registration.
///
/// Dropping the subscription unregisters it.
pub struct EventSubscription {
    id: u64,
    receiver: mpsc::UnboundedReceiver<NodeEvent>,
    registry: Weak<Mutex<Registry>>,
}

impl EventSubscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next event; `None` once unregistered or the bus is gone.
    pub async fn recv(&mut self) -> Option<NodeEvent> {
        self.receiver.recv().await
    }

    /// Remove this subscription from its bus. Idempotent.
    pub fn unregister(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).subscribers.remove(&self.id);
        }
        self.registry = Weak::new();
        self.receiver.close();
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.unregister();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bandchain_core::Keypair;

    fn peer() -> PublicKey {
        Keypair::from_seed(&[7; 32]).public_key()
    }

    fn record(kind: &str, stats: &[(&str, u64)]) -> TransferRecord {
        TransferRecord {
            kind: kind.to_string(),
            peer: Some(peer()),
            stats: stats.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }

    #[test]
    fn test_kinds_map_their_counters() {
        let circuit = record("circuit", &[("bytes_up", 1), ("bytes_down", 2)]);
        let relay = record("relay", &[("bytes_relay_up", 3), ("bytes_relay_down", 4)]);
        let exit = record("exit_socket", &[("bytes_exit", 5), ("bytes_enter", 6)]);

        let circuit = TransferEvent::try_from(circuit).unwrap();
        let relay = TransferEvent::try_from(relay).unwrap();
        let exit = TransferEvent::try_from(exit).unwrap();

        assert_eq!((circuit.bytes_up(), circuit.bytes_down()), (1, 2));
        assert_eq!((relay.bytes_up(), relay.bytes_down()), (3, 4));
        assert_eq!((exit.bytes_up(), exit.bytes_down()), (5, 6));
        assert_eq!(exit.peer_identity(), Some(peer()));
    }

    #[test]
    fn test_relay_ignores_circuit_counters() {
        let relay = TransferEvent::try_from(record("relay", &[("bytes_up", 9)])).unwrap();
        assert_eq!(relay.bytes_up(), 0);
    }

    #[test]
    fn test_unknown_kind_is_fatal() {
        let err = TransferEvent::try_from(record("hidden_service", &[])).unwrap_err();
        assert!(matches!(&err, NodeError::UnknownTransferKind(kind) if kind == "hidden_service"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_transfer_event_json_shape() {
        let event = TransferEvent::Circuit {
            peer: None,
            bytes_up: 1,
            bytes_down: 2,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "circuit");
        assert_eq!(json["bytes_down"], 2);
    }

    #[tokio::test]
    async fn test_bus_delivers_to_subscribers() {
        let bus = EventBus::new();
        let mut one = bus.subscribe();
        let mut two = bus.subscribe();
        assert_ne!(one.id(), two.id());

        assert_eq!(bus.publish(NodeEvent::PeerIntroduced(peer())), 2);
        assert_eq!(one.recv().await, Some(NodeEvent::PeerIntroduced(peer())));
        assert_eq!(two.recv().await, Some(NodeEvent::PeerIntroduced(peer())));
    }

    #[tokio::test]
    async fn test_unregister_and_drop() {
        let bus = EventBus::new();
        let mut one = bus.subscribe();
        let two = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        one.unregister();
        one.unregister();
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(one.recv().await, None);

        drop(two);
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.publish(NodeEvent::PeerIntroduced(peer())), 0);
    }
}
