//! Prometheus metrics.
//!
//! Everything registers into a registry owned by [`TagMetrics`] instead of
//! the process-global default, so several instances can coexist in tests.

use prometheus::{IntCounter, IntGauge, Registry, TextEncoder};

use crate::error::ServerResult;

/// Container for all tagtrack metrics.
#[derive(Clone)]
pub struct TagMetrics {
    registry: Registry,

    /// Successful tag resolutions.
    pub tags_resolved: IntCounter,
    /// Register calls that reached the cache.
    pub tags_registered: IntCounter,
    /// Registrations that created a brand new tag.
    pub tags_created: IntCounter,
    /// Durable-store failures observed by the service.
    pub store_failures: IntCounter,

    /// Notification records decoded from peers.
    pub frames_decoded: IntCounter,
    /// Heartbeat frames received.
    pub heartbeats: IntCounter,
    /// Frames that failed to decode.
    pub decode_errors: IntCounter,

    /// Payloads queued to a peer by the broadcaster.
    pub broadcast_deliveries: IntCounter,
    /// Payloads the broadcaster could not queue.
    pub broadcast_failures: IntCounter,

    /// Open peer connections.
    pub active_connections: IntGauge,
    /// Sessions in the connection registry.
    pub registered_sessions: IntGauge,
}

impl TagMetrics {
    /// Create and register all metrics.
    pub fn new() -> ServerResult<Self> {
        let registry = Registry::new_custom(Some("tagtrack".to_string()), None)?;

        Ok(Self {
            tags_resolved: counter(&registry, "tags_resolved_total", "Tag resolutions served")?,
            tags_registered: counter(&registry, "tags_registered_total", "Tag registrations")?,
            tags_created: counter(&registry, "tags_created_total", "Registrations that created a tag")?,
            store_failures: counter(&registry, "store_failures_total", "Durable store failures")?,
            frames_decoded: counter(&registry, "frames_decoded_total", "Notification frames decoded")?,
            heartbeats: counter(&registry, "heartbeats_total", "Heartbeat frames received")?,
            decode_errors: counter(&registry, "decode_errors_total", "Malformed inbound frames")?,
            broadcast_deliveries: counter(
                &registry,
                "broadcast_deliveries_total",
                "Broadcast payloads queued to peers",
            )?,
            broadcast_failures: counter(
                &registry,
                "broadcast_failures_total",
                "Broadcast payloads that could not be queued",
            )?,
            active_connections: gauge(&registry, "active_connections", "Open peer connections")?,
            registered_sessions: gauge(&registry, "registered_sessions", "Registered client sessions")?,
            registry,
        })
    }

    /// Connection accepted.
    pub fn connection_opened(&self) {
        self.active_connections.inc();
    }

    /// Connection finished.
    pub fn connection_closed(&self) {
        self.active_connections.dec();
    }

    /// Set the registered-session gauge.
    pub fn set_registered_sessions(&self, count: usize) {
        self.registered_sessions.set(count as i64);
    }

    /// Text exposition format of every metric.
    pub fn render(&self) -> ServerResult<String> {
        Ok(TextEncoder::new().encode_to_string(&self.registry.gather())?)
    }
}

impl std::fmt::Debug for TagMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagMetrics")
            .field("tags_resolved", &self.tags_resolved.get())
            .field("active_connections", &self.active_connections.get())
            .finish_non_exhaustive()
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntCounter> {
    let counter = IntCounter::new(name, help)?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntGauge> {
    let gauge = IntGauge::new(name, help)?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instances_are_independent() {
        let a = TagMetrics::new().unwrap();
        let b = TagMetrics::new().unwrap();
        a.tags_resolved.inc();
        assert_eq!(a.tags_resolved.get(), 1);
        assert_eq!(b.tags_resolved.get(), 0);
    }

    #[test]
    fn test_render_uses_namespace() {
        let metrics = TagMetrics::new().unwrap();
        metrics.heartbeats.inc_by(3);
        metrics.connection_opened();
        metrics.set_registered_sessions(2);

        let text = metrics.render().unwrap();
        assert!(text.contains("tagtrack_heartbeats_total 3"));
        assert!(text.contains("tagtrack_active_connections 1"));
        assert!(text.contains("tagtrack_registered_sessions 2"));
    }
}
