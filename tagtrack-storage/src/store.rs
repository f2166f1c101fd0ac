//! Durable store contract and in-memory implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use tagtrack_core::{AccessLogEntry, TagError, TagRecord, TagResult};

// ============================================================================
// STORE TRAIT
// ============================================================================

/// Durable store for tag records and the append-only access log.
///
/// The relational schema behind it is not part of this crate. Implementations
/// must treat `upsert_tag` as idempotent: writing a record whose id already
/// exists replaces it and never fails as a duplicate.
#[async_trait]
pub trait TagStore: Send + Sync {
    /// Get a tag by id. `Ok(None)` means the store has no such tag.
    async fn get_tag(&self, id: &str) -> TagResult<Option<TagRecord>>;

    /// Insert or replace a tag.
    async fn upsert_tag(&self, tag: &TagRecord) -> TagResult<()>;

    /// List all tags. Used once at startup to warm the cache.
    async fn list_tags(&self) -> TagResult<Vec<TagRecord>>;

    /// Append one entry to the access log table.
    async fn append_access_log(&self, entry: &AccessLogEntry) -> TagResult<()>;
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

/// In-memory store for development and testing.
///
/// [`InMemoryTagStore::set_available`] simulates an outage: while
/// unavailable every operation fails with `StoreUnavailable`.
#[derive(Debug)]
pub struct InMemoryTagStore {
    tags: RwLock<HashMap<String, TagRecord>>,
    access_logs: RwLock<Vec<AccessLogEntry>>,
    available: AtomicBool,
    get_calls: AtomicU64,
    upsert_calls: AtomicU64,
}

impl Default for InMemoryTagStore {
    fn default() -> Self {
        Self {
            tags: RwLock::new(HashMap::new()),
            access_logs: RwLock::new(Vec::new()),
            available: AtomicBool::new(true),
            get_calls: AtomicU64::new(0),
            upsert_calls: AtomicU64::new(0),
        }
    }
}

impl InMemoryTagStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `tags`.
    pub fn with_tags(tags: impl IntoIterator<Item = TagRecord>) -> Self {
        let store = Self::new();
        {
            let mut map = store.tags.write().unwrap_or_else(PoisonError::into_inner);
            for tag in tags {
                map.insert(tag.id.clone(), tag);
            }
        }
        store
    }

    /// Toggle simulated availability.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Direct read that bypasses availability and call counters.
    pub fn peek(&self, id: &str) -> Option<TagRecord> {
        self.tags
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Number of stored tags.
    pub fn tag_count(&self) -> usize {
        self.tags.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Persisted access log entries, in append order.
    pub fn access_logs(&self) -> Vec<AccessLogEntry> {
        self.access_logs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of `get_tag` calls served or refused.
    pub fn get_calls(&self) -> u64 {
        self.get_calls.load(Ordering::SeqCst)
    }

    /// Number of `upsert_tag` calls served or refused.
    pub fn upsert_calls(&self) -> u64 {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    fn check_available(&self, operation: &'static str) -> TagResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TagError::store_unavailable(operation, "store offline"))
        }
    }
}

#[async_trait]
impl TagStore for InMemoryTagStore {
    async fn get_tag(&self, id: &str) -> TagResult<Option<TagRecord>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available("get_tag")?;
        Ok(self.peek(id))
    }

    async fn upsert_tag(&self, tag: &TagRecord) -> TagResult<()> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available("upsert_tag")?;
        self.tags
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tag.id.clone(), tag.clone());
        Ok(())
    }

    async fn list_tags(&self) -> TagResult<Vec<TagRecord>> {
        self.check_available("list_tags")?;
        Ok(self
            .tags
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect())
    }

    async fn append_access_log(&self, entry: &AccessLogEntry) -> TagResult<()> {
        self.check_available("append_access_log")?;
        self.access_logs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.clone());
        Ok(())
    }
}
