//! Best-effort fan-out to every registered session.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::metrics::TagMetrics;
use crate::registry::{ConnectionRegistry, DeliveryError};

/// Outcome of one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Sessions in the snapshot.
    pub attempted: usize,
    /// Sessions whose outbound queue accepted the payload.
    pub delivered: usize,
    /// Client ids the payload could not be queued for, with the reason.
    pub failed: Vec<(String, DeliveryError)>,
}

/// Pushes payloads to every session in the registry.
///
/// Each peer has its own bounded queue drained by its own writer task, so
/// a slow or dead peer costs the others nothing. Delivery is at most once
/// with no acknowledgement.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<TagMetrics>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>, metrics: Arc<TagMetrics>) -> Self {
        Self { registry, metrics }
    }

    /// Queue `payload` for every session registered right now.
    pub fn broadcast(&self, payload: Bytes) -> BroadcastReport {
        let sessions = self.registry.snapshot();
        let mut report = BroadcastReport {
            attempted: sessions.len(),
            ..Default::default()
        };

        for session in sessions {
            // Bytes clones share the buffer.
            match session.try_send(payload.clone()) {
                Ok(()) => {
                    report.delivered += 1;
                    self.metrics.broadcast_deliveries.inc();
                }
                Err(e) => {
                    self.metrics.broadcast_failures.inc();
                    warn!(
                        client_id = %session.id,
                        remote_addr = %session.remote_addr,
                        error = %e,
                        "Broadcast to peer failed"
                    );
                    report.failed.push((session.id, e));
                }
            }
        }

        debug!(
            attempted = report.attempted,
            delivered = report.delivered,
            bytes = payload.len(),
            "Broadcast complete"
        );
        report
    }
}
