//! Access journal: per-tag access logs, the fleet-wide log and durable appends.
//!
//! The in-memory appends happen under the cache's exclusive lock. The durable
//! side is handed to a single background writer through a bounded queue,
//! so a tag scan never waits on store latency. For every scan the writer
//! appends the fleet-wide entry, then writes the tag's current record so its
//! bounded access log survives a restart. Entries are enqueued while the
//! cache lock is held and the writer drains them one at a time, which keeps
//! durable order identical to in-memory order for every tag.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tagtrack_core::{
    AccessEvent, AccessLogEntry, TagError, TagResult, TagtrackConfig, UnixTimestamp,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::TagCache;
use crate::store::TagStore;

/// Configuration for the durable access-log writer.
#[derive(Debug, Clone)]
pub struct JournalConfig {
    /// Entries that may wait for the writer before new ones are dropped.
    pub queue_capacity: usize,
    /// Upper bound on one durable append.
    pub store_timeout: Duration,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            store_timeout: Duration::from_secs(2),
        }
    }
}

impl JournalConfig {
    /// Set the queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the per-append timeout.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }
}

impl From<&TagtrackConfig> for JournalConfig {
    fn from(config: &TagtrackConfig) -> Self {
        Self {
            queue_capacity: config.access_queue,
            store_timeout: config.store_timeout,
        }
    }
}

/// Counters for the journal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JournalStats {
    /// Accesses recorded in memory.
    pub recorded: u64,
    /// Durable store writes that failed or timed out.
    pub durable_failures: u64,
    /// Scans whose durable writes were dropped because the queue was full or closed.
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    recorded: AtomicU64,
    durable_failures: AtomicU64,
    dropped: AtomicU64,
}

enum WriterCommand {
    Append(AccessLogEntry),
    Flush(oneshot::Sender<()>),
}

/// Records tag resolutions.
pub struct AccessJournal {
    cache: Arc<TagCache>,
    global: Mutex<Vec<AccessLogEntry>>,
    sender: mpsc::Sender<WriterCommand>,
    writer: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl AccessJournal {
    /// Create the journal and spawn its durable writer on the current runtime.
    pub fn start(cache: Arc<TagCache>, config: JournalConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let counters = Arc::new(Counters::default());
        let writer = tokio::spawn(run_writer(
            cache.clone(),
            receiver,
            config.store_timeout,
            counters.clone(),
        ));

        Self {
            cache,
            global: Mutex::new(Vec::new()),
            sender,
            writer: Mutex::new(Some(writer)),
            counters,
        }
    }

    /// Record one resolution of `tag_id`.
    ///
    /// The tag must already be cached; resolution always reads it first.
    /// Returns `NotFound` otherwise and records nothing. The durable writes
    /// are best-effort and never reported to the caller.
    pub async fn record_access(
        &self,
        tag_id: &str,
        ip: &str,
        user_agent: &str,
        timestamp: UnixTimestamp,
    ) -> TagResult<()> {
        let mut tags = self.cache.tags.write().await;
        let record = tags
            .get_mut(tag_id)
            .ok_or_else(|| TagError::not_found(tag_id))?;
        let event = AccessEvent {
            ip: ip.to_string(),
            user_agent: user_agent.to_string(),
            timestamp,
        };
        let entry = event.for_tag(tag_id);
        record.access_log.push(event);

        self.global
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.clone());

        if let Err(e) = self.sender.try_send(WriterCommand::Append(entry)) {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "queue full",
                mpsc::error::TrySendError::Closed(_) => "writer stopped",
            };
            warn!(tag_id = %tag_id, reason, "Dropped durable access-log write");
        }
        drop(tags);

        self.counters.recorded.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Fleet-wide access log in append order.
    pub fn global_snapshot(&self) -> Vec<AccessLogEntry> {
        self.global
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Wait until every append enqueued so far has been attempted.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(WriterCommand::Flush(tx)).await.is_err() {
            return;
        }
        let _ = rx.await;
    }

    /// Drain the queue and stop the writer.
    pub async fn shutdown(&self) {
        self.flush().await;
        let writer = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(writer) = writer {
            writer.abort();
            let _ = writer.await;
        }
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> JournalStats {
        JournalStats {
            recorded: self.counters.recorded.load(Ordering::Relaxed),
            durable_failures: self.counters.durable_failures.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for AccessJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessJournal")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

async fn run_writer(
    cache: Arc<TagCache>,
    mut receiver: mpsc::Receiver<WriterCommand>,
    store_timeout: Duration,
    counters: Arc<Counters>,
) {
    let store = cache.store().clone();
    while let Some(command) = receiver.recv().await {
        match command {
            WriterCommand::Append(entry) => {
                let appended =
                    tokio::time::timeout(store_timeout, store.append_access_log(&entry)).await;
                note_durable_write(
                    &counters,
                    &entry.tag_id,
                    "append_access_log",
                    store_timeout,
                    appended,
                );

                // The read guard keeps a concurrent upsert from writing a newer
                // record that this one would then overwrite.
                let tags = cache.tags.read().await;
                if let Some(record) = tags.get(&entry.tag_id) {
                    let persisted =
                        tokio::time::timeout(store_timeout, store.upsert_tag(record)).await;
                    note_durable_write(
                        &counters,
                        &entry.tag_id,
                        "upsert_tag",
                        store_timeout,
                        persisted,
                    );
                }
            }
            WriterCommand::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Access-log writer stopped");
}

fn note_durable_write(
    counters: &Counters,
    tag_id: &str,
    operation: &'static str,
    store_timeout: Duration,
    outcome: Result<TagResult<()>, tokio::time::error::Elapsed>,
) {
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            counters.durable_failures.fetch_add(1, Ordering::Relaxed);
            warn!(tag_id = %tag_id, operation, error = %e, "Durable access write failed");
        }
        Err(_) => {
            counters.durable_failures.fetch_add(1, Ordering::Relaxed);
            warn!(
                tag_id = %tag_id,
                operation,
                timeout_ms = store_timeout.as_millis() as u64,
                "Durable access write timed out"
            );
        }
    }
}
