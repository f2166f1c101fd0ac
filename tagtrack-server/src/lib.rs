//! tagtrack Server - Resolution Service and Peer Connection Plane
//!
//! [`TagService`] is what the routing layer calls to resolve and register
//! tags. Peers hold long-lived connections to the notification listener:
//! [`NotificationIngestor`] reads their newline-delimited frames and keeps
//! [`ConnectionRegistry`] current, and [`Broadcaster`] pushes payloads back
//! out to every registered peer.

pub mod broadcast;
pub mod codec;
pub mod error;
pub mod events;
pub mod ingest;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod service;
pub mod state;
pub mod telemetry;
pub mod tls;

pub use broadcast::{BroadcastReport, Broadcaster};
pub use codec::{Frame, FrameCodec, FrameReader, ReadOutcome};
pub use error::{ServerError, ServerResult};
pub use events::{forward_to_peers, EventBus, TagEvent};
pub use ingest::{ConnectionReport, IngestConfig, IngestState, NotificationIngestor};
pub use metrics::TagMetrics;
pub use registry::{ClientSession, ConnectionRegistry, DeliveryError};
pub use server::{NotifyServer, Transport};
pub use service::TagService;
pub use state::AppState;
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};
pub use tls::build_acceptor;
