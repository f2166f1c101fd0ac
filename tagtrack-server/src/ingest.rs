//! Per-connection notification ingestion.
//!
//! Every accepted connection goes through
//! `AwaitingStream -> Reading -> Registered* -> Closed`:
//!
//! - `AwaitingStream`: the transport stream (plain TCP or a finished TLS
//!   handshake) is obtained. Failure is logged and the connection dropped.
//! - `Reading`: frames are read one line at a time. Heartbeats only refresh
//!   liveness. Malformed frames are logged and skipped.
//! - `Registered`: a record with a non-empty `id` puts this connection in the
//!   registry under that id, replacing any other connection holding it.
//! - `Closed`: end of stream, a read error, the idle timeout or a dead writer.
//!   The registry entry is removed if it still belongs to this connection.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tagtrack_core::{Notification, TagError, TagResult, TagtrackConfig};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::codec::{Frame, FrameCodec, FrameReader, ReadOutcome};
use crate::metrics::TagMetrics;
use crate::registry::{ClientSession, ConnectionRegistry};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestState {
    AwaitingStream,
    Reading,
    Registered,
    Closed,
}

/// Settings for every connection handled by one ingestor.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub heartbeat_token: String,
    pub max_frame_bytes: usize,
    /// `None` disables the liveness timeout.
    pub idle_timeout: Option<Duration>,
    pub outbound_queue: usize,
    pub write_timeout: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self::from(&TagtrackConfig::default())
    }
}

impl From<&TagtrackConfig> for IngestConfig {
    fn from(config: &TagtrackConfig) -> Self {
        Self {
            heartbeat_token: config.heartbeat_token.clone(),
            max_frame_bytes: config.max_frame_bytes,
            idle_timeout: config.idle_timeout,
            outbound_queue: config.outbound_queue,
            write_timeout: config.write_timeout,
        }
    }
}

/// Summary of a finished connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionReport {
    pub session_uid: Uuid,
    pub remote_addr: SocketAddr,
    /// Always `Closed` once `serve` returns.
    pub final_state: IngestState,
    /// Last client id this connection asserted.
    pub client_id: Option<String>,
    pub notifications: u64,
    pub heartbeats: u64,
    pub decode_errors: u64,
    /// Why the connection ended. `None` for a clean remote close.
    pub close_reason: Option<TagError>,
}

struct Connection {
    session_uid: Uuid,
    remote_addr: SocketAddr,
    state: IngestState,
    client_id: Option<String>,
    notifications: u64,
    heartbeats: u64,
    decode_errors: u64,
}

impl Connection {
    fn transition(&mut self, next: IngestState) {
        if self.state != next {
            debug!(
                session_uid = %self.session_uid,
                from = ?self.state,
                to = ?next,
                "Connection state change"
            );
            self.state = next;
        }
    }

    fn into_report(self, close_reason: Option<TagError>) -> ConnectionReport {
        ConnectionReport {
            session_uid: self.session_uid,
            remote_addr: self.remote_addr,
            final_state: self.state,
            client_id: self.client_id,
            notifications: self.notifications,
            heartbeats: self.heartbeats,
            decode_errors: self.decode_errors,
            close_reason,
        }
    }
}

/// Runs the read loop for accepted peer connections.
#[derive(Debug, Clone)]
pub struct NotificationIngestor {
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<TagMetrics>,
    config: IngestConfig,
}

impl NotificationIngestor {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        metrics: Arc<TagMetrics>,
        config: IngestConfig,
    ) -> Self {
        Self {
            registry,
            metrics,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Drive one connection to completion.
    ///
    /// `stream` resolves to the transport once it is usable, so a TLS
    /// handshake is part of the `AwaitingStream` state.
    pub async fn serve<F, S>(&self, stream: F, remote_addr: SocketAddr) -> ConnectionReport
    where
        F: Future<Output = io::Result<S>>,
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let mut conn = Connection {
            session_uid: Uuid::new_v4(),
            remote_addr,
            state: IngestState::AwaitingStream,
            client_id: None,
            notifications: 0,
            heartbeats: 0,
            decode_errors: 0,
        };

        let stream = match stream.await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(remote_addr = %remote_addr, error = %e, "Failed to establish peer stream");
                conn.transition(IngestState::Closed);
                return conn.into_report(Some(TagError::connection_lost(e)));
            }
        };

        self.metrics.connection_opened();
        conn.transition(IngestState::Reading);
        info!(session_uid = %conn.session_uid, remote_addr = %remote_addr, "Peer connected");

        let (reader, writer) = tokio::io::split(stream);
        let (outbound, queue) = mpsc::channel(self.config.outbound_queue.max(1));
        let mut writer_task = tokio::spawn(drain_outbound(writer, queue, self.config.write_timeout));
        let mut frames = FrameReader::new(
            reader,
            FrameCodec::new(self.config.heartbeat_token.clone(), self.config.max_frame_bytes),
        );

        let result = tokio::select! {
            result = self.read_loop(&mut conn, &mut frames, &outbound) => result,
            finished = &mut writer_task => match finished {
                Ok(Err(e)) => Err(e),
                _ => Err(TagError::connection_lost("outbound writer stopped")),
            },
        };
        writer_task.abort();

        conn.transition(IngestState::Closed);
        if let Some(id) = conn.client_id.as_deref() {
            if self.registry.unregister_session(id, conn.session_uid) {
                debug!(client_id = %id, "Unregistered session");
            }
            self.metrics.set_registered_sessions(self.registry.len());
        }
        self.metrics.connection_closed();

        let close_reason = result.err();
        match &close_reason {
            None => info!(session_uid = %conn.session_uid, "Peer disconnected"),
            Some(reason) => info!(
                session_uid = %conn.session_uid,
                reason = %reason,
                "Peer connection closed"
            ),
        }
        conn.into_report(close_reason)
    }

    async fn read_loop<R>(
        &self,
        conn: &mut Connection,
        frames: &mut FrameReader<R>,
        outbound: &mpsc::Sender<Bytes>,
    ) -> TagResult<()>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            let next = match self.config.idle_timeout {
                Some(limit) => tokio::time::timeout(limit, frames.next())
                    .await
                    .map_err(|_| {
                        TagError::connection_lost(format!(
                            "no frame within {}s",
                            limit.as_secs_f64()
                        ))
                    })??,
                None => frames.next().await?,
            };

            match next {
                ReadOutcome::Closed => return Ok(()),
                ReadOutcome::Frame(Frame::Heartbeat) => {
                    conn.heartbeats += 1;
                    self.metrics.heartbeats.inc();
                }
                ReadOutcome::Malformed(e) => {
                    conn.decode_errors += 1;
                    self.metrics.decode_errors.inc();
                    warn!(session_uid = %conn.session_uid, error = %e, "Dropping malformed frame");
                }
                ReadOutcome::Frame(Frame::Notification(notification)) => {
                    conn.notifications += 1;
                    self.metrics.frames_decoded.inc();
                    self.on_notification(conn, notification, outbound);
                }
            }
        }
    }

    fn on_notification(
        &self,
        conn: &mut Connection,
        notification: Notification,
        outbound: &mpsc::Sender<Bytes>,
    ) {
        if notification.id.is_empty() {
            debug!(
                session_uid = %conn.session_uid,
                info = %notification.info,
                "Notification without client id"
            );
            return;
        }

        if let Some(previous) = conn.client_id.as_deref() {
            if previous != notification.id {
                self.registry.unregister_session(previous, conn.session_uid);
            }
        }

        let session = ClientSession::new(
            notification.id.clone(),
            conn.session_uid,
            conn.remote_addr,
            outbound.clone(),
        );
        if let Some(replaced) = self.registry.register(session) {
            if replaced.session_uid != conn.session_uid {
                info!(
                    client_id = %notification.id,
                    previous_addr = %replaced.remote_addr,
                    previous_connected_at = %replaced.connected_at,
                    remote_addr = %conn.remote_addr,
                    "Client id moved to a new connection"
                );
            }
        }
        self.metrics.set_registered_sessions(self.registry.len());

        if conn.state != IngestState::Registered {
            info!(client_id = %notification.id, remote_addr = %conn.remote_addr, "Client registered");
        }
        conn.client_id = Some(notification.id);
        conn.transition(IngestState::Registered);
    }
}

async fn drain_outbound<W>(
    mut writer: W,
    mut queue: mpsc::Receiver<Bytes>,
    write_timeout: Duration,
) -> TagResult<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(payload) = queue.recv().await {
        let write = async {
            writer.write_all(&payload).await?;
            writer.flush().await
        };
        match tokio::time::timeout(write_timeout, write).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(TagError::connection_lost(e)),
            Err(_) => return Err(TagError::connection_lost("write timed out")),
        }
    }
    Ok(())
}
