//! Peer notification listener.

use std::future::{ready, Future};
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info};

use crate::error::{ServerError, ServerResult};
use crate::ingest::NotificationIngestor;

/// How accepted TCP connections are turned into peer streams.
#[derive(Clone)]
pub enum Transport {
    /// Plaintext, for development.
    Plain,
    /// Mutual TLS.
    Tls(TlsAcceptor),
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain => f.write_str("Plain"),
            Self::Tls(_) => f.write_str("Tls"),
        }
    }
}

/// Accept loop handing each connection to the ingestor on its own task.
pub struct NotifyServer {
    listener: TcpListener,
    transport: Transport,
    ingestor: Arc<NotificationIngestor>,
}

impl NotifyServer {
    pub async fn bind(
        addr: SocketAddr,
        transport: Transport,
        ingestor: Arc<NotificationIngestor>,
    ) -> ServerResult<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| ServerError::Bind {
            addr: addr.to_string(),
            source: e,
        })?;
        Ok(Self {
            listener,
            transport,
            ingestor,
        })
    }

    pub fn local_addr(&self) -> ServerResult<SocketAddr> {
        self.listener.local_addr().map_err(ServerError::Accept)
    }

    /// Accept connections until `shutdown` resolves.
    ///
    /// An accept error ends the loop and is returned. Nothing that happens
    /// inside a single connection can.
    pub async fn run<F>(self, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Notification listener shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    let (tcp, remote_addr) = accepted.map_err(ServerError::Accept)?;
                    if let Err(e) = tcp.set_nodelay(true) {
                        debug!(remote_addr = %remote_addr, error = %e, "Failed to set TCP_NODELAY");
                    }
                    self.spawn_connection(tcp, remote_addr);
                }
            }
        }
    }

    fn spawn_connection(&self, tcp: tokio::net::TcpStream, remote_addr: SocketAddr) {
        let ingestor = self.ingestor.clone();
        match &self.transport {
            Transport::Plain => {
                tokio::spawn(async move {
                    ingestor.serve(ready(Ok(tcp)), remote_addr).await;
                });
            }
            Transport::Tls(acceptor) => {
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    ingestor.serve(acceptor.accept(tcp), remote_addr).await;
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::IngestConfig;
    use crate::metrics::TagMetrics;
    use crate::registry::ConnectionRegistry;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn test_plain_listener_registers_peer() {
        let registry = Arc::new(ConnectionRegistry::new());
        let ingestor = Arc::new(NotificationIngestor::new(
            registry.clone(),
            Arc::new(TagMetrics::new().unwrap()),
            IngestConfig::default(),
        ));
        let server = NotifyServer::bind(
            SocketAddr::from(([127, 0, 0, 1], 0)),
            Transport::Plain,
            ingestor,
        )
        .await
        .unwrap();
        let addr = server.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let running = tokio::spawn(server.run(async move {
            let _ = stop_rx.await;
        }));

        let mut peer = TcpStream::connect(addr).await.unwrap();
        peer.write_all(b"{\"id\":\"device-1\"}\n").await.unwrap();

        let mut registered = false;
        for _ in 0..200 {
            if registry.get("device-1").is_some() {
                registered = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(registered);
        assert_eq!(
            registry.get("device-1").unwrap().remote_addr.ip(),
            addr.ip()
        );

        stop_tx.send(()).unwrap();
        running.await.unwrap().unwrap();
    }
}
