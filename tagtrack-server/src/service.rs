//! Entry points exposed to the routing layer.

use std::sync::Arc;

use tagtrack_core::{unix_now, TagError, TagRecord, TagResult, ValidationError};
use tagtrack_storage::{AccessJournal, TagCache, UpsertOutcome};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::events::{EventBus, TagEvent};
use crate::metrics::TagMetrics;

/// Tag resolution and registration.
#[derive(Debug, Clone)]
pub struct TagService {
    cache: Arc<TagCache>,
    journal: Arc<AccessJournal>,
    events: EventBus,
    metrics: Arc<TagMetrics>,
}

impl TagService {
    pub fn new(
        cache: Arc<TagCache>,
        journal: Arc<AccessJournal>,
        events: EventBus,
        metrics: Arc<TagMetrics>,
    ) -> Self {
        Self {
            cache,
            journal,
            events,
            metrics,
        }
    }

    /// Resolve a tag for an end-user scan and record the access.
    ///
    /// The returned record is the state before this access was appended.
    pub async fn resolve(
        &self,
        tag_id: &str,
        caller_ip: &str,
        caller_user_agent: &str,
    ) -> TagResult<TagRecord> {
        let record = self.cache.get(tag_id).await.map_err(|e| self.observe(e))?;

        if let Err(e) = self
            .journal
            .record_access(tag_id, caller_ip, caller_user_agent, unix_now())
            .await
        {
            warn!(tag_id = %tag_id, error = %e, "Failed to record access");
        }

        self.metrics.tags_resolved.inc();
        debug!(tag_id = %tag_id, ip = %caller_ip, "Resolved tag");
        Ok(record)
    }

    /// Register or re-register a tag.
    ///
    /// `id` and `hash` are required. A zero `created` is replaced by the
    /// current time.
    pub async fn register(&self, mut incoming: TagRecord) -> TagResult<UpsertOutcome> {
        if incoming.id.is_empty() {
            return Err(required("id"));
        }
        if incoming.content_hash.is_empty() {
            return Err(required("hash"));
        }
        if incoming.created_at == 0 {
            incoming.created_at = unix_now();
        }

        let outcome = self.cache.upsert(incoming).await?;
        self.metrics.tags_registered.inc();
        if !outcome.persisted {
            self.metrics.store_failures.inc();
        }

        let event = if outcome.created {
            self.metrics.tags_created.inc();
            TagEvent::Created {
                id: outcome.record.id.clone(),
                url: outcome.record.url.clone(),
            }
        } else {
            TagEvent::Updated {
                id: outcome.record.id.clone(),
            }
        };
        self.events.publish(event);

        Ok(outcome)
    }

    /// Whether a tag exists, loading it into the cache if the store has it.
    /// Does not record an access.
    pub async fn exists(&self, tag_id: &str) -> TagResult<bool> {
        match self.cache.get(tag_id).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(self.observe(e)),
        }
    }

    /// Subscribe to tag lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<TagEvent> {
        self.events.subscribe()
    }

    pub fn cache(&self) -> &Arc<TagCache> {
        &self.cache
    }

    pub fn journal(&self) -> &Arc<AccessJournal> {
        &self.journal
    }

    fn observe(&self, err: TagError) -> TagError {
        if matches!(err, TagError::StoreUnavailable { .. }) {
            self.metrics.store_failures.inc();
        }
        err
    }
}

fn required(field: &str) -> TagError {
    ValidationError::RequiredFieldMissing {
        field: field.to_string(),
    }
    .into()
}
