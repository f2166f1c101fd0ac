//! Property tests over generated registrations, scans and peer frames.

use std::collections::HashMap;
use std::sync::Arc;

use proptest::prelude::*;
use tagtrack_server::{AppState, Frame, FrameCodec, FrameReader, ReadOutcome};
use tagtrack_test_utils::assertions::assert_logs_bounded;
use tagtrack_test_utils::fixtures::{tag, test_config, TEST_BASE_URL};
use tagtrack_test_utils::generators::{arb_access_event, arb_notification, arb_registration};
use tagtrack_test_utils::{InMemoryTagStore, Notification, MAX_LOG_ENTRIES};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Every record written to the wire comes back out of the reader in order,
    /// with heartbeats in between counted and never mistaken for records.
    #[test]
    fn prop_reader_yields_records_between_heartbeats(
        notifications in prop::collection::vec(arb_notification(), 1..12),
        beats_between in 0usize..3,
    ) {
        let mut wire = Vec::new();
        for notification in &notifications {
            for _ in 0..beats_between {
                wire.extend_from_slice(b"|beat|\n");
            }
            wire.extend_from_slice(&serde_json::to_vec(notification).unwrap());
            wire.push(b'\n');
        }

        let (decoded, heartbeats) = runtime().block_on(async {
            let mut reader = FrameReader::new(wire.as_slice(), FrameCodec::new("|beat|", 4096));
            let mut decoded: Vec<Notification> = Vec::new();
            let mut heartbeats = 0usize;
            loop {
                match reader.next().await.unwrap() {
                    ReadOutcome::Frame(Frame::Notification(n)) => decoded.push(n),
                    ReadOutcome::Frame(Frame::Heartbeat) => heartbeats += 1,
                    ReadOutcome::Malformed(e) => panic!("unexpected decode error: {e}"),
                    ReadOutcome::Closed => break,
                }
            }
            (decoded, heartbeats)
        });

        prop_assert_eq!(decoded, notifications.clone());
        prop_assert_eq!(heartbeats, beats_between * notifications.len());
    }

    /// After any sequence of registrations each tag resolves to its latest
    /// content, under a URL derived from its id.
    #[test]
    fn prop_resolve_returns_latest_registration(
        registrations in prop::collection::vec(arb_registration(), 1..16),
    ) {
        let mut latest: HashMap<String, (String, i64)> = HashMap::new();
        for r in &registrations {
            latest.insert(r.id.clone(), (r.content_hash.clone(), r.created_at));
        }

        let resolved = runtime().block_on(async {
            let state = AppState::build(test_config(), Arc::new(InMemoryTagStore::new())).unwrap();
            for r in &registrations {
                state.service.register(r.clone()).await.unwrap();
            }
            let mut resolved = HashMap::new();
            for id in latest.keys() {
                let record = state.service.resolve(id, "192.0.2.1", "prop").await.unwrap();
                resolved.insert(id.clone(), record);
            }
            resolved
        });

        for (id, (hash, created_at)) in &latest {
            let record = &resolved[id];
            prop_assert_eq!(&record.content_hash, hash);
            prop_assert_eq!(record.created_at, *created_at);
            prop_assert_eq!(record.url.clone(), format!("{TEST_BASE_URL}/{id}"));
            assert_logs_bounded(record);
        }
    }

    /// A tag's access log is the most recent scans in arrival order, while
    /// the fleet-wide log keeps every one.
    #[test]
    fn prop_access_log_keeps_most_recent_scans(
        scans in prop::collection::vec(arb_access_event(), 0..200),
    ) {
        let (record, global_len) = runtime().block_on(async {
            let state = AppState::build(test_config(), Arc::new(InMemoryTagStore::new())).unwrap();
            state.service.register(tag("t1", "c1", "h1", 1)).await.unwrap();
            for scan in &scans {
                state
                    .journal
                    .record_access("t1", &scan.ip, &scan.user_agent, scan.timestamp)
                    .await
                    .unwrap();
            }
            let record = state.cache.get("t1").await.unwrap();
            (record, state.journal.global_snapshot().len())
        });

        let start = scans.len().saturating_sub(MAX_LOG_ENTRIES);
        let kept: Vec<_> = record.access_log.iter().cloned().collect();
        prop_assert_eq!(kept, scans[start..].to_vec());
        prop_assert_eq!(global_len, scans.len());
    }
}
