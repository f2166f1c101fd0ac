//! Cache-aside tag cache with write-through persistence.
//!
//! The whole map sits behind one `tokio::sync::RwLock`. Reads take the shared
//! side. [`TagCache::upsert`] takes the exclusive side and keeps it across the
//! durable-store lookup and write, so every other reader and writer waits on
//! that I/O. Tag writes are rare next to resolutions, so the coarse lock is
//! acceptable here.
//!
//! Persistence failures never roll the in-memory state back. Once a record
//! is cached, reads keep working regardless of store health, and the cache
//! may run ahead of the store until something reconciles them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tagtrack_core::{TagError, TagId, TagRecord, TagResult};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::store::TagStore;

/// Statistics about cache performance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads served from memory.
    pub hits: u64,
    /// Reads that went to the store.
    pub misses: u64,
    /// Records currently cached.
    pub entry_count: u64,
    /// Store calls that failed on the cache paths.
    pub store_failures: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Result of [`TagCache::upsert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// The record as it now sits in the cache.
    pub record: TagRecord,
    /// True when neither the cache nor the store knew the id.
    pub created: bool,
    /// False when the write-through to the store failed.
    pub persisted: bool,
}

/// Authoritative in-memory view of tag records.
///
/// The cache only grows: a record loaded by a miss or written by an upsert
/// stays for the lifetime of the process.
pub struct TagCache {
    pub(crate) tags: RwLock<HashMap<TagId, TagRecord>>,
    store: Arc<dyn TagStore>,
    base_url: String,
    hits: AtomicU64,
    misses: AtomicU64,
    store_failures: AtomicU64,
}

impl TagCache {
    /// Create an empty cache over `store`, deriving tag URLs under `base_url`.
    pub fn new(store: Arc<dyn TagStore>, base_url: impl Into<String>) -> Self {
        Self {
            tags: RwLock::new(HashMap::new()),
            store,
            base_url: base_url.into(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            store_failures: AtomicU64::new(0),
        }
    }

    /// The store this cache writes through to.
    pub fn store(&self) -> &Arc<dyn TagStore> {
        &self.store
    }

    /// Get a tag, filling the cache from the store on a miss.
    ///
    /// Returns `NotFound` when the store lacks the id and `StoreUnavailable`
    /// when the store lookup fails. Neither outcome caches anything.
    pub async fn get(&self, id: &str) -> TagResult<TagRecord> {
        if let Some(record) = self.tags.read().await.get(id) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(record.clone());
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let loaded = match self.store.get_tag(id).await {
            Ok(Some(record)) => record,
            Ok(None) => return Err(TagError::not_found(id)),
            Err(e) => {
                self.store_failures.fetch_add(1, Ordering::Relaxed);
                warn!(tag_id = %id, error = %e, "Store lookup failed on cache miss");
                return Err(into_store_error("get_tag", e));
            }
        };

        let mut tags = self.tags.write().await;
        // A concurrent upsert or miss-fill may have inserted it meanwhile.
        let record = tags.entry(id.to_string()).or_insert_with(|| {
            let mut record = loaded;
            record.assign_url(&self.base_url);
            record
        });
        debug!(tag_id = %id, "Loaded tag into cache");
        Ok(record.clone())
    }

    /// Register or re-register a tag.
    ///
    /// Only `id`, `client_id`, `content_hash` and `created_at` are taken from
    /// `incoming`; its url and logs are ignored. A re-registration pushes the
    /// prior ownership and content onto `history` before overwriting them.
    pub async fn upsert(&self, incoming: TagRecord) -> TagResult<UpsertOutcome> {
        let mut tags = self.tags.write().await;

        let (record, created) = if let Some(existing) = tags.get_mut(&incoming.id) {
            apply_update(existing, &incoming);
            existing.assign_url(&self.base_url);
            (existing.clone(), false)
        } else {
            let prior = match self.store.get_tag(&incoming.id).await {
                Ok(prior) => prior,
                Err(e) => {
                    // Treat as new rather than refuse the write.
                    self.store_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(tag_id = %incoming.id, error = %e, "Store lookup failed during upsert");
                    None
                }
            };

            let mut record = TagRecord::new(
                incoming.id.clone(),
                incoming.client_id.clone(),
                incoming.content_hash.clone(),
                incoming.created_at,
            );
            let created = match prior {
                Some(stored) => {
                    record.history = stored.history.clone();
                    record.history.push(stored.snapshot());
                    record.access_log = stored.access_log;
                    record.url = stored.url;
                    false
                }
                None => true,
            };
            record.assign_url(&self.base_url);
            tags.insert(record.id.clone(), record.clone());
            (record, created)
        };

        let persisted = match self.store.upsert_tag(&record).await {
            Ok(()) => true,
            Err(e) => {
                self.store_failures.fetch_add(1, Ordering::Relaxed);
                warn!(tag_id = %record.id, error = %e, "Write-through failed, cache is ahead of store");
                false
            }
        };
        drop(tags);

        if created {
            info!(tag_id = %record.id, url = %record.url, "Registered new tag");
        } else {
            debug!(tag_id = %record.id, history = record.history.len(), "Re-registered tag");
        }

        Ok(UpsertOutcome {
            record,
            created,
            persisted,
        })
    }

    /// Load every stored record into the cache. Called once at startup.
    ///
    /// Records already cached are left alone. Returns how many were inserted.
    pub async fn warm(&self) -> TagResult<usize> {
        let records = match self.store.list_tags().await {
            Ok(records) => records,
            Err(e) => {
                self.store_failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Cache warm-up failed, starting cold");
                return Err(into_store_error("list_tags", e));
            }
        };

        let mut tags = self.tags.write().await;
        let mut loaded = 0;
        for mut record in records {
            if tags.contains_key(&record.id) {
                continue;
            }
            record.assign_url(&self.base_url);
            tags.insert(record.id.clone(), record);
            loaded += 1;
        }
        info!(loaded, "Cache warmed from store");
        Ok(loaded)
    }

    /// Whether `id` is currently cached. Never touches the store.
    pub async fn contains(&self, id: &str) -> bool {
        self.tags.read().await.contains_key(id)
    }

    /// Number of cached records.
    pub async fn len(&self) -> usize {
        self.tags.read().await.len()
    }

    /// Whether nothing is cached.
    pub async fn is_empty(&self) -> bool {
        self.tags.read().await.is_empty()
    }

    /// Snapshot of the counters.
    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.len().await as u64,
            store_failures: self.store_failures.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for TagCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagCache")
            .field("base_url", &self.base_url)
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

fn apply_update(existing: &mut TagRecord, incoming: &TagRecord) {
    existing.history.push(existing.snapshot());
    existing.client_id = incoming.client_id.clone();
    existing.content_hash = incoming.content_hash.clone();
    existing.created_at = incoming.created_at;
}

fn into_store_error(operation: &'static str, err: TagError) -> TagError {
    match err {
        TagError::StoreUnavailable { .. } => err,
        other => TagError::store_unavailable(operation, other),
    }
}

// ============================================================================
// TESTS
// ============================================================================
