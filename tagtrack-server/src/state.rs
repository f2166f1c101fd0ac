//! Process-wide context, built once at startup and shared by handle.

use std::sync::Arc;

use tagtrack_core::TagtrackConfig;
use tagtrack_storage::{AccessJournal, JournalConfig, TagCache, TagStore};

use crate::broadcast::Broadcaster;
use crate::error::ServerResult;
use crate::events::EventBus;
use crate::ingest::{IngestConfig, NotificationIngestor};
use crate::metrics::TagMetrics;
use crate::registry::ConnectionRegistry;
use crate::service::TagService;

/// Every long-lived component, wired together.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: TagtrackConfig,
    pub cache: Arc<TagCache>,
    pub journal: Arc<AccessJournal>,
    pub registry: Arc<ConnectionRegistry>,
    pub broadcaster: Arc<Broadcaster>,
    pub events: EventBus,
    pub service: TagService,
    pub metrics: Arc<TagMetrics>,
}

impl AppState {
    /// Wire the components over `store`. Must run inside a tokio runtime
    /// because the access journal spawns its writer.
    pub fn build(config: TagtrackConfig, store: Arc<dyn TagStore>) -> ServerResult<Self> {
        let metrics = Arc::new(TagMetrics::new()?);
        let cache = Arc::new(TagCache::new(store, config.base_url.clone()));
        let journal = Arc::new(AccessJournal::start(
            cache.clone(),
            JournalConfig::from(&config),
        ));
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Arc::new(Broadcaster::new(registry.clone(), metrics.clone()));
        let events = EventBus::new(config.event_capacity);
        let service = TagService::new(
            cache.clone(),
            journal.clone(),
            events.clone(),
            metrics.clone(),
        );

        Ok(Self {
            config,
            cache,
            journal,
            registry,
            broadcaster,
            events,
            service,
            metrics,
        })
    }

    /// Ingestor for peer connections, sharing this state's registry.
    pub fn ingestor(&self) -> NotificationIngestor {
        NotificationIngestor::new(
            self.registry.clone(),
            self.metrics.clone(),
            IngestConfig::from(&self.config),
        )
    }
}
