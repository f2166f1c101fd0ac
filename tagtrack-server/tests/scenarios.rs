//! End-to-end scenarios across the cache, journal and connection plane.

use std::future::ready;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tagtrack_server::{forward_to_peers, AppState, ConnectionReport, TagEvent};
use tagtrack_test_utils::assertions::{
    assert_history_hashes, assert_not_found, assert_store_unavailable,
};
use tagtrack_test_utils::fixtures::{notification_line, store_with, tag, test_config};
use tagtrack_test_utils::{InMemoryTagStore, SlowTagStore, TagtrackConfig, MAX_LOG_ENTRIES};
use tokio::io::{
    duplex, split, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf,
    WriteHalf,
};
use tokio::task::JoinHandle;

struct Peer {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
    handle: JoinHandle<ConnectionReport>,
    addr: SocketAddr,
}

impl Peer {
    async fn send(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
    }

    async fn close(self) -> ConnectionReport {
        drop(self.writer);
        drop(self.lines);
        self.handle.await.unwrap()
    }
}

fn state_over(store: Arc<InMemoryTagStore>) -> AppState {
    AppState::build(test_config(), store).unwrap()
}

fn connect(state: &AppState, port: u16) -> Peer {
    let (client, server) = duplex(8192);
    let addr = SocketAddr::from(([192, 0, 2, 10], port));
    let ingestor = state.ingestor();
    let handle = tokio::spawn(async move { ingestor.serve(ready(Ok(server)), addr).await });
    let (read_half, writer) = split(client);
    Peer {
        lines: BufReader::new(read_half).lines(),
        writer,
        handle,
        addr,
    }
}

async fn wait_until<F: Fn() -> bool>(check: F) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn register_then_reregister_keeps_prior_state_in_history() {
    let state = state_over(Arc::new(InMemoryTagStore::new()));

    state.service.register(tag("t1", "c1", "h1", 1000)).await.unwrap();
    let first = state.cache.get("t1").await.unwrap();
    assert_eq!(first.content_hash, "h1");
    assert_eq!(first.created_at, 1000);
    assert!(first.history.is_empty());

    state.service.register(tag("t1", "c1", "h2", 2000)).await.unwrap();
    let second = state.cache.get("t1").await.unwrap();
    assert_eq!(second.content_hash, "h2");
    assert_eq!(second.created_at, 2000);
    assert_history_hashes(&second, &["h1"]);
    assert_eq!(second.history.first().unwrap().created_at, 1000);
    assert_eq!(second.url, first.url);
}

#[tokio::test]
async fn resolving_unknown_tag_is_not_found_and_leaves_cache_alone() {
    let state = state_over(Arc::new(InMemoryTagStore::new()));
    state.service.register(tag("t1", "c1", "h1", 1)).await.unwrap();

    let result = state.service.resolve("t2", "203.0.113.9", "scanner").await;
    assert_not_found(&result);
    assert_eq!(state.cache.len().await, 1);
    assert!(state.journal.global_snapshot().is_empty());
}

#[tokio::test]
async fn one_hundred_fifty_one_scans_drop_the_first() {
    let store = store_with([tag("t3", "c1", "h1", 1)]);
    let config = TagtrackConfig {
        access_queue: 1024,
        ..test_config()
    };
    let state = AppState::build(config, store.clone()).unwrap();

    for i in 1..=151 {
        state
            .service
            .resolve("t3", &format!("10.0.0.{}", i % 250), &format!("scan-{i}"))
            .await
            .unwrap();
    }
    state.journal.flush().await;

    let record = state.cache.get("t3").await.unwrap();
    assert_eq!(record.access_log.len(), MAX_LOG_ENTRIES);
    let agents: Vec<&str> = record
        .access_log
        .iter()
        .map(|a| a.user_agent.as_str())
        .collect();
    let expected: Vec<String> = (2..=151).map(|i| format!("scan-{i}")).collect();
    assert_eq!(agents, expected);

    assert_eq!(state.journal.global_snapshot().len(), 151);
    assert_eq!(store.access_logs().len(), 151);
    assert_eq!(state.metrics.tags_resolved.get(), 151);
}

#[tokio::test]
async fn duplicate_client_id_broadcast_reaches_only_newest_connection() {
    let state = state_over(Arc::new(InMemoryTagStore::new()));
    let registry = state.registry.clone();

    let mut first = connect(&state, 5001);
    first.send(&notification_line("c1")).await;
    let first_addr = first.addr;
    wait_until(|| registry.get("c1").map(|s| s.remote_addr) == Some(first_addr)).await;

    let mut second = connect(&state, 5002);
    second.send(&notification_line("c1")).await;
    let second_addr = second.addr;
    wait_until(|| registry.get("c1").map(|s| s.remote_addr) == Some(second_addr)).await;
    assert_eq!(registry.len(), 1);

    let report = state.broadcaster.broadcast(Bytes::from_static(b"ping\n"));
    assert_eq!(report.attempted, 1);
    assert_eq!(report.delivered, 1);

    assert_eq!(
        second.lines.next_line().await.unwrap().as_deref(),
        Some("ping")
    );
    let nothing = tokio::time::timeout(Duration::from_millis(100), first.lines.next_line()).await;
    assert!(nothing.is_err(), "replaced connection must not receive the broadcast");

    // The replaced connection closing must not evict the newer session.
    let report = first.close().await;
    assert_eq!(report.client_id.as_deref(), Some("c1"));
    assert_eq!(registry.get("c1").unwrap().remote_addr, second_addr);

    second.close().await;
    assert!(registry.is_empty());
}

#[tokio::test]
async fn heartbeats_never_create_a_session() {
    let state = state_over(Arc::new(InMemoryTagStore::new()));

    let mut peer = connect(&state, 6001);
    for _ in 0..5 {
        peer.send(b"|beat|\n").await;
    }
    let report = peer.close().await;

    assert_eq!(report.heartbeats, 5);
    assert_eq!(report.notifications, 0);
    assert!(state.registry.is_empty());
    assert_eq!(state.metrics.heartbeats.get(), 5);
    assert_eq!(state.metrics.registered_sessions.get(), 0);
}

#[tokio::test]
async fn heartbeats_leave_a_registered_session_untouched() {
    let state = state_over(Arc::new(InMemoryTagStore::new()));
    let registry = state.registry.clone();

    let mut peer = connect(&state, 6002);
    peer.send(&notification_line("c1")).await;
    wait_until(|| registry.get("c1").is_some()).await;
    let before = registry.get("c1").unwrap();
    assert_eq!(state.metrics.registered_sessions.get(), 1);

    peer.send(b"|beat|\n|beat|\n|beat|\n").await;
    let metrics = state.metrics.clone();
    wait_until(|| metrics.heartbeats.get() == 3).await;

    let after = registry.get("c1").unwrap();
    assert_eq!(after.session_uid, before.session_uid);
    assert_eq!(after.remote_addr, before.remote_addr);
    assert_eq!(after.connected_at, before.connected_at);
    assert_eq!(registry.len(), 1);
    assert_eq!(state.metrics.registered_sessions.get(), 1);

    let report = state.broadcaster.broadcast(Bytes::from_static(b"still-here\n"));
    assert_eq!(report.delivered, 1);
    assert_eq!(
        peer.lines.next_line().await.unwrap().as_deref(),
        Some("still-here")
    );

    let report = peer.close().await;
    assert_eq!(report.heartbeats, 3);
    assert_eq!(report.notifications, 1);
}

#[tokio::test]
async fn unreachable_store_on_miss_is_reported_and_nothing_cached() {
    let store = store_with([tag("t4", "c1", "h1", 1)]);
    let state = state_over(store.clone());
    store.set_available(false);

    let result = state.service.resolve("t4", "203.0.113.5", "scanner").await;
    assert_store_unavailable(&result);
    assert!(state.cache.is_empty().await);

    store.set_available(true);
    let record = state.service.resolve("t4", "203.0.113.5", "scanner").await.unwrap();
    assert_eq!(record.content_hash, "h1");
}

#[tokio::test]
async fn registered_peers_are_pushed_tag_events() {
    let state = state_over(Arc::new(InMemoryTagStore::new()));
    let forwarder = forward_to_peers(state.events.subscribe(), state.broadcaster.clone());
    let registry = state.registry.clone();

    let mut peer = connect(&state, 7001);
    peer.send(&notification_line("dashboard")).await;
    wait_until(|| registry.get("dashboard").is_some()).await;

    state.service.register(tag("t9", "c1", "h1", 1)).await.unwrap();
    state.service.register(tag("t9", "c1", "h2", 2)).await.unwrap();

    let created: TagEvent =
        serde_json::from_str(&peer.lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(
        created,
        TagEvent::Created {
            id: "t9".to_string(),
            url: "http://tags.test/t9".to_string(),
        }
    );
    let updated: TagEvent =
        serde_json::from_str(&peer.lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(updated, TagEvent::Updated { id: "t9".to_string() });

    forwarder.abort();
    peer.close().await;
}

#[tokio::test]
async fn cold_start_registration_carries_stored_history_forward() {
    let mut stored = tag("t5", "old-owner", "h1", 1000);
    stored.append_history("older-owner", "h0", 500);
    let store = store_with([stored]);
    let state = state_over(store.clone());

    let outcome = state.service.register(tag("t5", "new-owner", "h2", 2000)).await.unwrap();
    assert!(!outcome.created);
    assert_history_hashes(&outcome.record, &["h0", "h1"]);
    assert_eq!(store.peek("t5").unwrap(), outcome.record);
}

#[tokio::test(start_paused = true)]
async fn slow_store_times_out_durable_appends_without_blocking_scans() {
    let inner = store_with([tag("t1", "c1", "h1", 1)]);
    let slow = Arc::new(SlowTagStore::writes_only(inner.clone(), Duration::from_secs(10)));
    let state = AppState::build(test_config(), slow).unwrap();

    let started = tokio::time::Instant::now();
    state.service.resolve("t1", "198.51.100.1", "ua").await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));

    state.journal.flush().await;
    // The fleet-wide append and the record write both time out.
    assert_eq!(state.journal.stats().durable_failures, 2);
    assert!(inner.access_logs().is_empty());
    assert!(inner.peek("t1").unwrap().access_log.is_empty());
    assert_eq!(state.cache.get("t1").await.unwrap().access_log.len(), 1);
}

#[tokio::test]
async fn metrics_render_reflects_activity() {
    let state = state_over(Arc::new(InMemoryTagStore::new()));
    state.service.register(tag("t1", "c1", "h1", 1)).await.unwrap();
    state.service.resolve("t1", "ip", "ua").await.unwrap();

    let text = state.metrics.render().unwrap();
    assert!(text.contains("tagtrack_tags_created_total 1"));
    assert!(text.contains("tagtrack_tags_resolved_total 1"));
}
