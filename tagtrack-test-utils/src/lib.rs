//! tagtrack Test Utilities
//!
//! Shared test infrastructure for the tagtrack workspace:
//! - Proptest generators for tag records and notification frames
//! - A store wrapper that injects latency
//! - Fixtures for common scenarios
//! - Assertions for tag-specific checks

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub use tagtrack_core::{
    AccessEvent, AccessLogEntry, HistoryItem, Notification, TagError, TagRecord, TagResult,
    TagtrackConfig, MAX_LOG_ENTRIES,
};
pub use tagtrack_storage::{InMemoryTagStore, TagStore};

// ============================================================================
// SLOW STORE
// ============================================================================

/// Store wrapper that sleeps before every call to the inner store.
pub struct SlowTagStore<S> {
    inner: Arc<S>,
    read_delay: Duration,
    write_delay: Duration,
}

impl<S: TagStore> SlowTagStore<S> {
    pub fn new(inner: Arc<S>, delay: Duration) -> Self {
        Self {
            inner,
            read_delay: delay,
            write_delay: delay,
        }
    }

    /// Delay only writes (`upsert_tag` and `append_access_log`).
    pub fn writes_only(inner: Arc<S>, delay: Duration) -> Self {
        Self {
            inner,
            read_delay: Duration::ZERO,
            write_delay: delay,
        }
    }
}

#[async_trait]
impl<S: TagStore> TagStore for SlowTagStore<S> {
    async fn get_tag(&self, id: &str) -> TagResult<Option<TagRecord>> {
        tokio::time::sleep(self.read_delay).await;
        self.inner.get_tag(id).await
    }

    async fn upsert_tag(&self, tag: &TagRecord) -> TagResult<()> {
        tokio::time::sleep(self.write_delay).await;
        self.inner.upsert_tag(tag).await
    }

    async fn list_tags(&self) -> TagResult<Vec<TagRecord>> {
        tokio::time::sleep(self.read_delay).await;
        self.inner.list_tags().await
    }

    async fn append_access_log(&self, entry: &AccessLogEntry) -> TagResult<()> {
        tokio::time::sleep(self.write_delay).await;
        self.inner.append_access_log(entry).await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for tagtrack types.

    use super::*;
    use proptest::prelude::*;

    /// Tag ids as printed on physical tags: short, URL-safe.
    pub fn arb_tag_id() -> impl Strategy<Value = String> {
        "[A-Za-z0-9_-]{1,24}"
    }

    pub fn arb_client_id() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9-]{0,15}"
    }

    /// Hex digest of 64 characters.
    pub fn arb_content_hash() -> impl Strategy<Value = String> {
        "[0-9a-f]{64}"
    }

    /// Unix timestamps between 2001 and 2033.
    pub fn arb_timestamp() -> impl Strategy<Value = i64> {
        1_000_000_000i64..2_000_000_000i64
    }

    pub fn arb_access_event() -> impl Strategy<Value = AccessEvent> {
        (
            (any::<u8>(), any::<u8>(), any::<u8>(), any::<u8>()),
            "[A-Za-z/. 0-9]{0,40}",
            arb_timestamp(),
        )
            .prop_map(|((a, b, c, d), user_agent, timestamp)| AccessEvent {
                ip: format!("{a}.{b}.{c}.{d}"),
                user_agent,
                timestamp,
            })
    }

    /// A registration payload: no url and empty logs.
    pub fn arb_registration() -> impl Strategy<Value = TagRecord> {
        (arb_tag_id(), arb_client_id(), arb_content_hash(), arb_timestamp())
            .prop_map(|(id, client, hash, created)| TagRecord::new(id, client, hash, created))
    }

    /// A notification frame asserting a client id.
    pub fn arb_notification() -> impl Strategy<Value = Notification> {
        (arb_client_id(), "[ -~]{0,40}", "[0-9:TZ-]{0,20}").prop_map(|(id, info, time)| {
            Notification { id, info, time }
        })
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common scenarios.

    use super::*;

    pub const TEST_BASE_URL: &str = "http://tags.test";

    /// A tag with empty logs.
    pub fn tag(id: &str, client_id: &str, hash: &str, created_at: i64) -> TagRecord {
        TagRecord::new(id, client_id, hash, created_at)
    }

    /// A stored tag that already carries history and accesses, as a store
    /// would return it after earlier process lifetimes.
    pub fn stored_tag_with_history(id: &str, history_len: usize, access_len: usize) -> TagRecord {
        let mut record = TagRecord::new(id, "owner", "current", 10_000);
        for i in 0..history_len {
            record.append_history("owner", format!("old-{i}"), i as i64);
        }
        for i in 0..access_len {
            record.append_access("192.0.2.1", "fixture", i as i64);
        }
        record.assign_url(TEST_BASE_URL);
        record
    }

    /// Store pre-populated with `tags`.
    pub fn store_with(tags: impl IntoIterator<Item = TagRecord>) -> Arc<InMemoryTagStore> {
        Arc::new(InMemoryTagStore::with_tags(tags))
    }

    /// Config tuned for tests: test base URL, short timeouts, small queues.
    pub fn test_config() -> TagtrackConfig {
        TagtrackConfig {
            base_url: TEST_BASE_URL.to_string(),
            notify_bind: "127.0.0.1:0".to_string(),
            idle_timeout: None,
            outbound_queue: 8,
            write_timeout: Duration::from_millis(500),
            access_queue: 64,
            store_timeout: Duration::from_millis(200),
            event_capacity: 32,
            ..TagtrackConfig::default()
        }
    }

    /// Newline-terminated notification frame for `id`.
    pub fn notification_line(id: &str) -> Vec<u8> {
        format!("{{\"id\":\"{id}\",\"info\":\"hello\",\"time\":\"now\"}}\n").into_bytes()
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for tag-specific checks.

    use super::*;

    /// Assert that a result is `NotFound`.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &TagResult<T>) {
        match result {
            Err(TagError::NotFound { .. }) => {}
            other => panic!("Expected NotFound, got: {:?}", other),
        }
    }

    /// Assert that a result is `StoreUnavailable`.
    #[track_caller]
    pub fn assert_store_unavailable<T: std::fmt::Debug>(result: &TagResult<T>) {
        match result {
            Err(TagError::StoreUnavailable { .. }) => {}
            other => panic!("Expected StoreUnavailable, got: {:?}", other),
        }
    }

    /// Assert the content hashes of a tag's history, oldest first.
    #[track_caller]
    pub fn assert_history_hashes(record: &TagRecord, expected: &[&str]) {
        let actual: Vec<&str> = record
            .history
            .iter()
            .map(|h| h.content_hash.as_str())
            .collect();
        assert_eq!(actual, expected, "history of tag {}", record.id);
    }

    /// Assert both logs respect the size cap.
    #[track_caller]
    pub fn assert_logs_bounded(record: &TagRecord) {
        assert!(
            record.history.len() <= MAX_LOG_ENTRIES,
            "history of {} has {} entries",
            record.id,
            record.history.len()
        );
        assert!(
            record.access_log.len() <= MAX_LOG_ENTRIES,
            "access log of {} has {} entries",
            record.id,
            record.access_log.len()
        );
    }
}
