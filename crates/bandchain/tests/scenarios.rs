//! End-to-end scenarios: several nodes on one in-memory network.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use bandchain::core::{Keypair, PublicKey, Totals, GENESIS_SEQ};
use bandchain::protocol::{
    verify_convergence, ExchangeState, LedgerMessage, MemoryNetwork, MemoryTransport, Transport,
};
use bandchain::store::{LedgerStore, LedgerStoreExt, MemoryStore, SqliteStore};
use bandchain::{
    AutoCrawl, EventBus, Node, NodeConfig, NodeError, NodeEvent, TransferEvent, MEGA_DIVIDER,
};

const STEP: Duration = Duration::from_millis(200);
const IDLE: Duration = Duration::from_millis(20);

type MemNode = Node<MemoryStore, MemoryTransport>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

async fn node(network: &Arc<MemoryNetwork>, seed: u8) -> MemNode {
    node_with(network, seed, NodeConfig::default()).await
}

async fn node_with(network: &Arc<MemoryNetwork>, seed: u8, config: NodeConfig) -> MemNode {
    let keypair = Keypair::from_seed(&[seed; 32]);
    let transport = network.create_transport(keypair.public_key()).await;
    Node::new(keypair, MemoryStore::new(), transport, config)
}

/// Drive one full signing round from `requester` to `responder`.
async fn sign<S: LedgerStore, T: Transport>(
    requester: &mut Node<S, T>,
    responder: &mut Node<S, T>,
    up_mb: u64,
    down_mb: u64,
) {
    requester.increase_pending(responder.public_key(), up_mb * MEGA_DIVIDER, down_mb * MEGA_DIVIDER);
    requester.flush_pending(Instant::now()).await.unwrap().unwrap();
    assert!(responder.process_next(STEP).await.unwrap());
    assert!(requester.process_next(STEP).await.unwrap());
    assert_eq!(requester.exchange_state(), ExchangeState::Completed);
}

#[tokio::test]
async fn test_two_party_signing_round() {
    init_tracing();
    let network = MemoryNetwork::new();
    let mut a = node(&network, 1).await;
    let mut b = node(&network, 2).await;
    let (pk_a, pk_b) = (a.public_key(), b.public_key());

    sign(&mut a, &mut b, 10, 5).await;

    for store in [a.store(), b.store()] {
        assert_eq!(store.total_block_count().await.unwrap(), 2);
        assert_eq!(store.get_total(&pk_a).await.unwrap(), Some(Totals::new(10, 5)));
        assert_eq!(store.get_total(&pk_b).await.unwrap(), Some(Totals::new(5, 10)));
    }

    let block = a.store().get_latest(&pk_a).await.unwrap().unwrap();
    assert!(block.is_fully_signed());
    assert_eq!(b.store().get_linked(&block, &pk_a).await.unwrap(), Some(block.clone()));
    assert!(a.store().verify_chain(&pk_a).await.unwrap().is_empty());
    assert!(verify_convergence(a.store(), b.store(), &pk_b).await.unwrap().is_converged());
}

#[tokio::test]
async fn test_chains_link_across_rounds() {
    init_tracing();
    let network = MemoryNetwork::new();
    let mut a = node(&network, 1).await;
    let mut b = node(&network, 2).await;
    let pk_a = a.public_key();

    sign(&mut a, &mut b, 10, 5).await;
    sign(&mut b, &mut a, 2, 1).await;
    sign(&mut a, &mut b, 1, 0).await;

    assert_eq!(a.store().get_latest_sequence_number(&pk_a).await.unwrap(), 3);
    assert_eq!(a.store().get_total(&pk_a).await.unwrap(), Some(Totals::new(12, 7)));
    assert!(a.store().verify_chain(&pk_a).await.unwrap().is_empty());
    assert!(b.store().verify_chain(&pk_a).await.unwrap().is_empty());

    let stats = a.statistics().await.unwrap();
    assert_eq!(stats.self_total_blocks, 3);
    assert_eq!((stats.self_total_up_mb, stats.self_total_down_mb), (12, 7));
}

#[tokio::test]
async fn test_unanswered_request_times_out() {
    init_tracing();
    let network = MemoryNetwork::new();
    let mut a = node(&network, 1).await;
    let b = node(&network, 2).await;
    let pk_b = b.public_key();

    let now = Instant::now();
    a.increase_pending(pk_b, 3 * MEGA_DIVIDER, 0);
    let request = a.flush_pending(now).await.unwrap().unwrap();
    assert!(request.is_half_signed());

    assert!(a.housekeeping(now + Duration::from_secs(4)).is_none());
    let expired = a.housekeeping(now + Duration::from_secs(5)).unwrap();
    assert_eq!(expired, request);
    assert_eq!(a.exchange_state(), ExchangeState::TimedOut);

    assert_eq!(a.store().total_block_count().await.unwrap(), 1);
    assert_eq!(b.store().total_block_count().await.unwrap(), 0);
    assert!(a.store().contains(&request.compute_hash()).await.unwrap());
}

#[tokio::test]
async fn test_undeliverable_request_still_persists() {
    init_tracing();
    let network = MemoryNetwork::new();
    let mut a = node(&network, 1).await;
    let b = node(&network, 2).await;
    let pk_b = b.public_key();
    network.disconnect(&pk_b).await;

    a.increase_pending(pk_b, MEGA_DIVIDER, MEGA_DIVIDER);
    let request = a.flush_pending(Instant::now()).await.unwrap().unwrap();

    assert_eq!(a.exchange_state(), ExchangeState::RequestSent);
    assert!(a.store().contains(&request.compute_hash()).await.unwrap());
    assert!(a.pending().due().is_empty());
}

#[tokio::test]
async fn test_sub_megabyte_transfers_do_not_sign() {
    init_tracing();
    let network = MemoryNetwork::new();
    let mut a = node(&network, 1).await;
    let b = node(&network, 2).await;
    let pk_b = b.public_key();

    a.record_transfer(&TransferEvent::Relay {
        peer: Some(pk_b),
        bytes_relay_up: MEGA_DIVIDER - 1,
        bytes_relay_down: 10,
    });

    assert!(a.flush_pending(Instant::now()).await.unwrap().is_none());
    assert_eq!(a.exchange_state(), ExchangeState::Idle);
    assert_eq!(a.store().total_block_count().await.unwrap(), 0);
    assert_eq!(a.pending().get(&pk_b).unwrap().up, MEGA_DIVIDER - 1);
}

#[tokio::test]
async fn test_crawl_resumes_until_caught_up() {
    init_tracing();
    let network = MemoryNetwork::new();
    let mut a = node(&network, 1).await;
    let mut b = node(&network, 2).await;
    let mut c = node(&network, 3).await;
    let (pk_a, pk_b, pk_c) = (a.public_key(), b.public_key(), c.public_key());

    sign(&mut a, &mut b, 10, 5).await;
    sign(&mut a, &mut c, 30, 20).await;
    assert_eq!(c.store().total_block_count().await.unwrap(), 2);

    c.send_crawl_request(pk_a, Some(GENESIS_SEQ)).await.unwrap();
    assert!(a.process_next(STEP).await.unwrap());

    // Two blocks, then a resume. The second block is the one C signed.
    assert!(c.process_next(STEP).await.unwrap());
    assert!(c.process_next(STEP).await.unwrap());
    assert_eq!(c.store().count_blocks(&pk_a).await.unwrap(), 2);
    assert!(c.process_next(STEP).await.unwrap());

    // The resume asks again from sequence number 2; one block, no resume.
    assert!(a.process_next(STEP).await.unwrap());
    assert!(c.process_next(STEP).await.unwrap());
    assert!(!c.process_next(IDLE).await.unwrap());

    // A1 and A2 in A's chain, B1 in B's chain, C1 in C's chain.
    assert_eq!(c.store().total_block_count().await.unwrap(), 4);
    assert!(verify_convergence(a.store(), c.store(), &pk_a).await.unwrap().is_converged());
    assert!(verify_convergence(b.store(), c.store(), &pk_b).await.unwrap().is_converged());
    assert!(verify_convergence(a.store(), c.store(), &pk_c).await.unwrap().is_converged());
    for identity in [&pk_a, &pk_b, &pk_c] {
        assert!(c.store().verify_chain(identity).await.unwrap().is_empty());
    }
    assert_eq!(c.store().get_total(&pk_a).await.unwrap(), Some(Totals::new(40, 25)));
    assert_eq!(c.store().get_total(&pk_b).await.unwrap(), Some(Totals::new(5, 10)));

    let session = c.crawler().session(&pk_a).unwrap();
    assert_eq!(session.resumes, 1);
    assert_eq!(session.stored, 1);
}

#[tokio::test]
async fn test_crossed_requests_keep_chains_linked() {
    init_tracing();
    let network = MemoryNetwork::new();
    let mut a = node(&network, 1).await;
    let mut b = node(&network, 2).await;
    let (pk_a, pk_b) = (a.public_key(), b.public_key());

    // Both sides account the same transfer and flush at the same time.
    a.increase_pending(pk_b, 10 * MEGA_DIVIDER, 5 * MEGA_DIVIDER);
    b.increase_pending(pk_a, 5 * MEGA_DIVIDER, 10 * MEGA_DIVIDER);
    let now = Instant::now();
    a.flush_pending(now).await.unwrap().unwrap();
    b.flush_pending(now).await.unwrap().unwrap();

    loop {
        let a_got = a.process_next(IDLE).await.unwrap();
        let b_got = b.process_next(IDLE).await.unwrap();
        if !a_got && !b_got {
            break;
        }
    }

    let states = [a.exchange_state(), b.exchange_state()];
    assert!(states.contains(&ExchangeState::Completed));
    assert!(states.contains(&ExchangeState::Yielded));
    assert!(a.store().verify_chain(&pk_a).await.unwrap().is_empty());
    assert!(b.store().verify_chain(&pk_b).await.unwrap().is_empty());

    // The side that yielded keeps its half-signed block below the countersigned one.
    let (low, pk_low) = if pk_a < pk_b { (&a, pk_a) } else { (&b, pk_b) };
    assert_eq!(low.store().count_blocks(&pk_low).await.unwrap(), 2);

    sign(&mut a, &mut b, 1, 1).await;
    assert!(a.store().verify_chain(&pk_a).await.unwrap().is_empty());
    assert!(b.store().verify_chain(&pk_b).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_request_declined_while_own_request_outstanding() {
    init_tracing();
    let network = MemoryNetwork::new();
    let mut a = node(&network, 1).await;
    let mut b = node(&network, 2).await;
    let c = node(&network, 3).await;
    let (pk_a, pk_b) = (a.public_key(), b.public_key());

    b.increase_pending(c.public_key(), MEGA_DIVIDER, 0);
    b.flush_pending(Instant::now()).await.unwrap().unwrap();

    let now = Instant::now();
    a.increase_pending(pk_b, 2 * MEGA_DIVIDER, 0);
    a.flush_pending(now).await.unwrap().unwrap();
    assert!(b.process_next(STEP).await.unwrap());
    assert!(!a.process_next(IDLE).await.unwrap());
    assert_eq!(b.store().count_blocks(&pk_a).await.unwrap(), 0);

    a.housekeeping(now + Duration::from_secs(5));
    assert_eq!(a.exchange_state(), ExchangeState::TimedOut);
    assert!(a.store().verify_chain(&pk_a).await.unwrap().is_empty());
    assert!(b.store().verify_chain(&pk_b).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_crawl_of_empty_chain_gets_no_reply() {
    init_tracing();
    let network = MemoryNetwork::new();
    let mut a = node(&network, 1).await;
    let mut c = node(&network, 3).await;

    c.send_crawl_request(a.public_key(), None).await.unwrap();
    assert!(a.process_next(STEP).await.unwrap());
    assert!(!c.process_next(IDLE).await.unwrap());
    assert_eq!(c.store().total_block_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_introduced_peer_is_crawled() {
    init_tracing();
    let network = MemoryNetwork::new();
    let mut a = node(&network, 1).await;
    let mut b = node(&network, 2).await;
    let mut c = node(&network, 3).await.with_auto_crawl(AutoCrawl::new());
    let (pk_a, pk_c) = (a.public_key(), c.public_key());

    sign(&mut a, &mut b, 10, 5).await;

    c.handle_event(NodeEvent::PeerIntroduced(pk_c)).await.unwrap();
    c.handle_event(NodeEvent::PeerIntroduced(pk_a)).await.unwrap();

    let (from, message) = a.transport().recv_timeout(STEP).await.unwrap().unwrap();
    assert_eq!(from, pk_c);
    assert_eq!(message, LedgerMessage::CrawlRequest { requested_sequence_number: GENESIS_SEQ });
    a.handle_message(from, message).await.unwrap();

    assert!(c.process_next(STEP).await.unwrap());
    assert!(!c.process_next(IDLE).await.unwrap());
    assert_eq!(c.store().total_block_count().await.unwrap(), 2);
    assert!(!a.process_next(IDLE).await.unwrap());
}

#[tokio::test]
async fn test_introduction_without_auto_crawl_is_ignored() {
    init_tracing();
    let network = MemoryNetwork::new();
    let mut a = node(&network, 1).await;
    let mut c = node(&network, 3).await;

    c.handle_event(NodeEvent::PeerIntroduced(a.public_key())).await.unwrap();
    assert!(!a.process_next(IDLE).await.unwrap());
}

#[tokio::test]
async fn test_relayed_request_is_not_countersigned() {
    init_tracing();
    let network = MemoryNetwork::new();
    let mut a = node(&network, 1).await;
    let mut b = node(&network, 2).await;
    let c = node(&network, 3).await;
    let pk_b = b.public_key();

    a.increase_pending(pk_b, MEGA_DIVIDER, 0);
    let request = a.flush_pending(Instant::now()).await.unwrap().unwrap();
    assert!(b.transport().recv_timeout(STEP).await.unwrap().is_some());

    b.handle_message(c.public_key(), LedgerMessage::Signature { block: request })
        .await
        .unwrap();
    assert_eq!(b.store().total_block_count().await.unwrap(), 0);
    assert!(!a.process_next(IDLE).await.unwrap());
}

#[tokio::test]
async fn test_sqlite_chain_survives_restart() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path_a = dir.path().join("a.db");
    let path_b = dir.path().join("b.db");
    let network = MemoryNetwork::new();

    let ka = Keypair::from_seed(&[1; 32]);
    let kb = Keypair::from_seed(&[2; 32]);
    let (pk_a, pk_b) = (ka.public_key(), kb.public_key());

    {
        let ta = network.create_transport(pk_a).await;
        let tb = network.create_transport(pk_b).await;
        let mut a = Node::new(ka, SqliteStore::open(&path_a).unwrap(), ta, NodeConfig::default());
        let mut b = Node::new(kb, SqliteStore::open(&path_b).unwrap(), tb, NodeConfig::default());
        sign(&mut a, &mut b, 7, 3).await;
    }

    let a = SqliteStore::open(&path_a).unwrap();
    let b = SqliteStore::open(&path_b).unwrap();
    assert_eq!(a.get_total(&pk_a).await.unwrap(), Some(Totals::new(7, 3)));
    assert_eq!(b.get_total(&pk_b).await.unwrap(), Some(Totals::new(3, 7)));
    assert!(verify_convergence(&a, &b, &pk_a).await.unwrap().is_converged());
}

#[tokio::test]
async fn test_run_loop_signs_reported_transfers() {
    init_tracing();
    let network = MemoryNetwork::new();
    let config = NodeConfig {
        flush_interval: Duration::from_millis(20),
        housekeeping_interval: Duration::from_millis(10),
        ..NodeConfig::default()
    };

    let ka = Keypair::from_seed(&[1; 32]);
    let kb = Keypair::from_seed(&[2; 32]);
    let (pk_a, pk_b) = (ka.public_key(), kb.public_key());
    let store_b = Arc::new(MemoryStore::new());

    let bus = EventBus::new();
    let ta = network.create_transport(pk_a).await;
    let tb = network.create_transport(pk_b).await;
    let mut a = Node::new(ka, MemoryStore::new(), ta, config.clone()).with_subscription(bus.subscribe());
    let mut b = Node::with_shared_store(kb, Arc::clone(&store_b), tb, config);

    bus.publish(NodeEvent::Transfer(TransferEvent::Circuit {
        peer: Some(pk_b),
        bytes_up: 2 * MEGA_DIVIDER,
        bytes_down: MEGA_DIVIDER,
    }));

    let (stop, stopped) = watch::channel(false);
    let watcher = async {
        let signed = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if store_b.count_blocks(&pk_a).await.unwrap() == 1 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        let _ = stop.send(true);
        signed.is_ok()
    };

    let (ra, rb, signed) = tokio::join!(a.run(stopped.clone()), b.run(stopped), watcher);
    ra.unwrap();
    rb.unwrap();
    assert!(signed);

    assert_eq!(store_b.get_total(&pk_b).await.unwrap(), Some(Totals::new(1, 2)));
    assert_eq!(bus.subscriber_count(), 0);
}

#[tokio::test]
async fn test_run_loop_signs_every_due_peer_within_one_flush() {
    init_tracing();
    let network = MemoryNetwork::new();
    let config = NodeConfig {
        flush_interval: Duration::from_secs(60),
        housekeeping_interval: Duration::from_millis(10),
        ..NodeConfig::default()
    };

    let ka = Keypair::from_seed(&[1; 32]);
    let kb = Keypair::from_seed(&[2; 32]);
    let kc = Keypair::from_seed(&[3; 32]);
    let (pk_a, pk_b, pk_c) = (ka.public_key(), kb.public_key(), kc.public_key());
    let store_b = Arc::new(MemoryStore::new());
    let store_c = Arc::new(MemoryStore::new());

    let ta = network.create_transport(pk_a).await;
    let tb = network.create_transport(pk_b).await;
    let tc = network.create_transport(pk_c).await;
    let mut a = Node::new(ka, MemoryStore::new(), ta, config.clone());
    let mut b = Node::with_shared_store(kb, Arc::clone(&store_b), tb, config.clone());
    let mut c = Node::with_shared_store(kc, Arc::clone(&store_c), tc, config);

    a.increase_pending(pk_b, 2 * MEGA_DIVIDER, 0);
    a.increase_pending(pk_c, 3 * MEGA_DIVIDER, MEGA_DIVIDER);

    // Only the first flush tick fires while the watcher runs.
    let (stop, stopped) = watch::channel(false);
    let watcher = async {
        let signed = tokio::time::timeout(Duration::from_secs(3), async {
            loop {
                let at_b = store_b.count_blocks(&pk_a).await.unwrap();
                let at_c = store_c.count_blocks(&pk_a).await.unwrap();
                if at_b == 1 && at_c == 1 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        let _ = stop.send(true);
        signed.is_ok()
    };

    let (ra, rb, rc, signed) = tokio::join!(
        a.run(stopped.clone()),
        b.run(stopped.clone()),
        c.run(stopped),
        watcher
    );
    ra.unwrap();
    rb.unwrap();
    rc.unwrap();
    assert!(signed);

    assert!(a.pending().due().is_empty());
    assert_eq!(a.store().get_latest_sequence_number(&pk_a).await.unwrap(), 2);
    assert!(a.store().verify_chain(&pk_a).await.unwrap().is_empty());
    assert_eq!(store_b.get_total(&pk_b).await.unwrap(), Some(Totals::new(0, 2)));
    assert_eq!(store_c.get_total(&pk_c).await.unwrap(), Some(Totals::new(1, 3)));
}

#[tokio::test]
async fn test_run_loop_stops_on_unknown_transfer_kind() {
    init_tracing();
    let network = MemoryNetwork::new();
    let bus = EventBus::new();
    let mut a = node(&network, 1).await.with_subscription(bus.subscribe());

    let record: bandchain::TransferRecord =
        serde_json::from_str(r#"{"kind": "teleport", "peer": null, "stats": {"bytes_up": 5}}"#).unwrap();
    bus.publish(NodeEvent::TransferRecord(record));

    let (_stop, stopped) = watch::channel(false);
    let err = a.run(stopped).await.unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(err, NodeError::UnknownTransferKind(ref kind) if kind == "teleport"));
}

#[tokio::test]
async fn test_record_transfer_from_known_kinds() {
    init_tracing();
    let network = MemoryNetwork::new();
    let mut a = node(&network, 1).await;
    let peer: PublicKey = Keypair::from_seed(&[9; 32]).public_key();

    let record: bandchain::TransferRecord = serde_json::from_value(serde_json::json!({
        "kind": "exit_socket",
        "peer": peer,
        "stats": { "bytes_exit": MEGA_DIVIDER, "bytes_enter": 3 * MEGA_DIVIDER },
    }))
    .unwrap();
    a.handle_event(NodeEvent::TransferRecord(record)).await.unwrap();

    assert_eq!(a.pending().due(), vec![(peer, 1, 3)]);
}
