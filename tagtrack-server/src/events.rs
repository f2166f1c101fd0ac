//! Tag lifecycle events.
//!
//! Registration publishes onto an [`EventBus`]. The routing layer subscribes
//! to install a resolution route per new tag, and [`forward_to_peers`] pushes
//! each event to registered peers as a JSON line.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tagtrack_core::TagId;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::broadcast::Broadcaster;

/// Event emitted by tag registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TagEvent {
    /// A tag was registered for the first time.
    Created { id: TagId, url: String },
    /// An existing tag was re-registered.
    Updated { id: TagId },
}

impl TagEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Created { .. } => "Created",
            Self::Updated { .. } => "Updated",
        }
    }

    pub fn tag_id(&self) -> &str {
        match self {
            Self::Created { id, .. } | Self::Updated { id } => id,
        }
    }

    /// Encode as one newline-terminated JSON frame.
    pub fn to_frame(&self) -> Result<Bytes, serde_json::Error> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(Bytes::from(line))
    }
}

/// Fan-out channel for [`TagEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TagEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Returns how many subscribers will see it.
    pub fn publish(&self, event: TagEvent) -> usize {
        let event_type = event.event_type();
        match self.tx.send(event) {
            Ok(receivers) => {
                debug!(event_type, receivers, "Published tag event");
                receivers
            }
            Err(_) => {
                debug!(event_type, "No subscribers for tag event");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TagEvent> {
        self.tx.subscribe()
    }
}

/// Forward every event from `rx` to all registered peers until the bus closes.
pub fn forward_to_peers(
    mut rx: broadcast::Receiver<TagEvent>,
    broadcaster: Arc<Broadcaster>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => match event.to_frame() {
                    Ok(frame) => {
                        let report = broadcaster.broadcast(frame);
                        debug!(
                            tag_id = %event.tag_id(),
                            delivered = report.delivered,
                            failed = report.failed.len(),
                            "Forwarded tag event to peers"
                        );
                    }
                    Err(e) => warn!(error = %e, "Failed to encode tag event"),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event forwarder lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!("Event forwarder stopped");
    })
}
