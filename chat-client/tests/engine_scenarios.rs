//! End-to-end engine scenarios over the mock transport.

use chat_client::{
    ChatEvent, ConnectOutcome, DiscoveredDevice, EngineConfig, ManualClock, MessageStore,
    MockTransport, SqliteStore, SyncEngine, WriteError,
};
use chat_core::CloseReason;
use chat_types::{codec, DeviceId, MessageId, NewMessage};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

type Engine = SyncEngine<MockTransport, SqliteStore>;

struct Node {
    transport: MockTransport,
    store: SqliteStore,
    clock: Arc<ManualClock>,
    engine: Engine,
    events: mpsc::UnboundedReceiver<ChatEvent>,
}

async fn node(username: &str, peers: &[&str]) -> Node {
    let transport = MockTransport::new();
    for peer in peers {
        transport.add_device(peer, None);
    }
    let store = SqliteStore::in_memory().await.unwrap();
    node_with(transport, store, username).await
}

async fn node_with(transport: MockTransport, store: SqliteStore, username: &str) -> Node {
    let clock = Arc::new(ManualClock::new(1000));
    let (engine, events) = SyncEngine::start_with_clock(
        transport.clone(),
        store.clone(),
        EngineConfig::default(),
        clock.clone(),
    )
    .await
    .unwrap();
    if engine.profile().is_none() {
        engine.claim_profile(username).await.unwrap();
    }
    Node {
        transport,
        store,
        clock,
        engine,
        events,
    }
}

impl Node {
    async fn connect_all(&mut self, count: usize) {
        for _ in 0..count {
            let outcome = self.engine.discover_and_connect().await.unwrap();
            assert!(matches!(outcome, ConnectOutcome::Connected(_)));
            assert!(matches!(
                self.next_event().await,
                ChatEvent::PeerConnected(_)
            ));
        }
    }

    async fn next_event(&mut self) -> ChatEvent {
        tokio::time::timeout(Duration::from_secs(1), self.events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event stream closed")
    }

    async fn assert_quiet(&mut self) {
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(self.events.try_recv().is_err(), "unexpected event");
    }
}

fn wire(sender: &str, text: &str, timestamp: i64) -> Vec<u8> {
    codec::encode_draft(&NewMessage::new(sender, text, timestamp)).unwrap()
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// ===========================================
// Local Send
// ===========================================

#[tokio::test]
async fn local_send_is_stored_rendered_and_fanned_out() {
    let mut alice = node("alice", &["peer-a", "peer-b"]).await;
    alice.connect_all(2).await;

    let report = alice.engine.send_local("hi").await.unwrap().unwrap();

    assert_eq!(report.message.id, MessageId::new(1));
    assert_eq!(report.message.sender, "alice");
    assert_eq!(report.message.timestamp, 1000);
    assert_eq!(report.delivered(), 2);

    for peer in ["peer-a", "peer-b"] {
        let written = alice.transport.written_to(peer);
        assert_eq!(written.len(), 1);
        let decoded = codec::decode(&written[0]).unwrap();
        assert_eq!(decoded, NewMessage::new("alice", "hi", 1000));
    }

    match alice.next_event().await {
        ChatEvent::Message { message, mine } => {
            assert!(mine);
            assert_eq!(message, report.message);
        }
        other => panic!("expected message event, got {:?}", other),
    }
    alice.assert_quiet().await;
}

#[tokio::test]
async fn failing_peer_does_not_affect_others() {
    let mut alice = node("alice", &["peer-a", "peer-b", "peer-c"]).await;
    alice.connect_all(3).await;
    alice.transport.fail_writes_to("peer-b", "buffer full");

    let report = alice.engine.send_local("hi").await.unwrap().unwrap();

    let outcomes: Vec<(&str, bool)> = report
        .deliveries
        .iter()
        .map(|d| (d.device_id.as_str(), d.is_delivered()))
        .collect();
    assert_eq!(
        outcomes,
        vec![("peer-a", true), ("peer-b", false), ("peer-c", true)]
    );
    assert_eq!(report.failed(), 1);
    assert_eq!(alice.transport.written_to("peer-a").len(), 1);
    assert_eq!(alice.transport.written_to("peer-c").len(), 1);

    // Kept locally regardless of delivery
    assert_eq!(alice.store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn stalled_peer_does_not_delay_others() {
    let mut alice = node("alice", &["peer-a", "peer-b"]).await;
    alice.connect_all(2).await;
    alice.transport.stall_writes_to("peer-a");

    let sender = {
        let engine = alice.engine.clone();
        tokio::spawn(async move { engine.send_local("hi").await })
    };

    let transport = alice.transport.clone();
    wait_until(|| transport.written_to("peer-b").len() == 1).await;
    assert!(!sender.is_finished());

    // Losing the stalled peer resolves its write
    alice.transport.drop_link("peer-a", "out of range");

    let report = tokio::time::timeout(Duration::from_secs(1), sender)
        .await
        .expect("send should complete")
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(matches!(
        report.deliveries[0].outcome,
        Err(WriteError::LinkClosed)
    ));
    assert!(report.deliveries[1].is_delivered());
}

#[tokio::test]
async fn disconnect_resolves_outstanding_write() {
    let mut alice = node("alice", &["peer-a"]).await;
    alice.connect_all(1).await;
    alice.transport.stall_writes_to("peer-a");

    let sender = {
        let engine = alice.engine.clone();
        tokio::spawn(async move { engine.send_local("hi").await })
    };
    let store = alice.store.clone();
    tokio::time::timeout(Duration::from_secs(1), async {
        while store.count().await.unwrap() == 0 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(alice.engine.disconnect(&DeviceId::from("peer-a")).await);

    let report = tokio::time::timeout(Duration::from_secs(1), sender)
        .await
        .expect("send should complete")
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(matches!(
        report.deliveries[0].outcome,
        Err(WriteError::LinkClosed)
    ));
    assert!(alice.engine.peers().is_empty());
}

// ===========================================
// Inbound
// ===========================================

#[tokio::test]
async fn inbound_message_from_peer_is_stored_as_theirs() {
    let mut alice = node("alice", &["peer-b"]).await;
    alice.connect_all(1).await;

    assert!(alice.transport.deliver("peer-b", &wire("bob", "yo", 2000)).await);

    match alice.next_event().await {
        ChatEvent::Message { message, mine } => {
            assert!(!mine);
            assert_eq!(message.sender, "bob");
            assert_eq!(message.text, "yo");
            assert_eq!(message.timestamp, 2000);
        }
        other => panic!("expected message event, got {:?}", other),
    }
    assert_eq!(alice.store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn self_echo_and_garbage_never_reach_the_store() {
    let mut alice = node("alice", &["peer-b"]).await;
    alice.connect_all(1).await;

    assert!(alice.transport.deliver("peer-b", &wire("alice", "hi", 1000)).await);
    assert!(alice.transport.deliver("peer-b", b"{\"sender\":\"bob\"").await);
    assert!(alice.transport.deliver("peer-b", b"\xff\xfe").await);
    // The link survives bad payloads
    assert!(alice.transport.deliver("peer-b", &wire("bob", "still here", 1500)).await);

    match alice.next_event().await {
        ChatEvent::Message { message, .. } => assert_eq!(message.text, "still here"),
        other => panic!("expected message event, got {:?}", other),
    }
    assert_eq!(alice.store.count().await.unwrap(), 1);
    assert_eq!(alice.engine.peers().len(), 1);
}

#[tokio::test]
async fn out_of_order_arrivals_replay_in_timestamp_order() {
    let mut alice = node("alice", &["peer-b"]).await;
    alice.connect_all(1).await;

    for (text, ts) in [("second", 2000), ("first", 1000), ("third", 3000)] {
        assert!(alice.transport.deliver("peer-b", &wire("bob", text, ts)).await);
        let _ = alice.next_event().await;
    }

    let history = alice.engine.history().await.unwrap();
    let timestamps: Vec<i64> = history.iter().map(|m| m.timestamp).collect();
    assert_eq!(timestamps, vec![1000, 2000, 3000]);
    let ids: Vec<u64> = history.iter().map(|m| m.id.value()).collect();
    assert_eq!(ids, vec![2, 1, 3]);
}

#[tokio::test]
async fn interleaved_local_and_remote_appends_get_unique_ids() {
    let mut alice = node("alice", &["peer-b"]).await;
    alice.connect_all(1).await;

    let local = {
        let engine = alice.engine.clone();
        tokio::spawn(async move {
            for i in 0..10 {
                engine.send_local(&format!("local {}", i)).await.unwrap();
            }
        })
    };
    for i in 0..10 {
        let payload = wire("bob", &format!("remote {}", i), 1000 + i);
        assert!(alice.transport.deliver("peer-b", &payload).await);
    }
    local.await.unwrap();

    let mut seen = Vec::new();
    for _ in 0..20 {
        if let ChatEvent::Message { message, .. } = alice.next_event().await {
            seen.push(message.id);
        }
    }

    // Events come out in accepted order, which is id order
    let mut sorted = seen.clone();
    sorted.sort();
    assert_eq!(seen, sorted);
    assert_eq!(seen.iter().collect::<HashSet<_>>().len(), 20);
    assert_eq!(alice.store.count().await.unwrap(), 20);
}

// ===========================================
// Peer Lifecycle
// ===========================================

#[tokio::test]
async fn connecting_twice_reports_already_connected() {
    let mut alice = node("alice", &["peer-a"]).await;
    alice.connect_all(1).await;

    let again = alice
        .engine
        .connect(DiscoveredDevice::new("peer-a", None))
        .await
        .unwrap();

    assert_eq!(again, ConnectOutcome::AlreadyConnected);
    assert_eq!(alice.engine.peers().len(), 1);
    assert_eq!(alice.transport.open_count("peer-a"), 1);
}

#[tokio::test]
async fn lost_link_is_removed_and_reported() {
    let mut alice = node("alice", &["peer-a", "peer-b"]).await;
    alice.connect_all(2).await;

    alice.transport.drop_link("peer-a", "supervision timeout");

    match alice.next_event().await {
        ChatEvent::PeerDisconnected { device_id, reason } => {
            assert_eq!(device_id, DeviceId::from("peer-a"));
            assert_eq!(reason, CloseReason::Lost("supervision timeout".into()));
        }
        other => panic!("expected disconnect, got {:?}", other),
    }
    let peers = alice.engine.peers();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].device_id, DeviceId::from("peer-b"));

    // Sends now only go to the remaining peer
    let report = alice.engine.send_local("hi").await.unwrap().unwrap();
    assert_eq!(report.deliveries.len(), 1);
    assert!(matches!(
        alice.next_event().await,
        ChatEvent::Message { mine: true, .. }
    ));

    // The device can be reconnected with a fresh link
    alice.connect_all(1).await;
    assert_eq!(alice.engine.peers().len(), 2);
    assert_eq!(alice.transport.open_count("peer-a"), 2);
}

// ===========================================
// Restart
// ===========================================

#[tokio::test]
async fn history_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("messages.db");

    let before = {
        let store = SqliteStore::open(&path).await.unwrap();
        let mut alice = node_with(MockTransport::new(), store, "alice").await;
        alice.transport.add_device("peer-b", None);
        alice.connect_all(1).await;

        alice.engine.send_local("hi").await.unwrap();
        alice.clock.set(500);
        alice.engine.send_local("earlier").await.unwrap();
        assert!(alice.transport.deliver("peer-b", &wire("bob", "yo", 2000)).await);
        for _ in 0..3 {
            let _ = alice.next_event().await;
        }

        let history = alice.engine.history().await.unwrap();
        alice.engine.shutdown().await;
        alice.store.close().await;
        history
    };
    assert_eq!(before.len(), 3);

    let store = SqliteStore::open(&path).await.unwrap();
    let alice = node_with(MockTransport::new(), store, "ignored").await;

    assert_eq!(alice.engine.profile().unwrap().username, "alice");
    assert_eq!(alice.engine.history().await.unwrap(), before);
    assert_eq!(alice.store.load_all().await.unwrap(), before);
}
