//! tagtrack Server Entry Point
//!
//! Loads configuration, warms the tag cache and runs the peer notification
//! listener until Ctrl-C.

use std::sync::Arc;

use tagtrack_core::TagtrackConfig;
use tagtrack_server::{
    build_acceptor, forward_to_peers, init_tracing, AppState, NotifyServer, ServerResult,
    TelemetryConfig, Transport,
};
use tagtrack_storage::{InMemoryTagStore, TagStore};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> ServerResult<()> {
    let telemetry_config = TelemetryConfig::default();
    init_tracing(&telemetry_config)?;

    let config = TagtrackConfig::from_env();
    config.validate()?;
    let addr = config.notify_addr()?;
    let tls = config.tls()?;

    // Deployments with a relational store plug their TagStore in here.
    let store: Arc<dyn TagStore> = Arc::new(InMemoryTagStore::new());
    let state = AppState::build(config, store)?;

    if let Ok(loaded) = state.cache.warm().await {
        info!(loaded, "Tag cache ready");
    }

    let tls_enabled = tls.is_some();
    let transport = match tls {
        Some(paths) => Transport::Tls(build_acceptor(&paths)?),
        None => {
            warn!("No TLS material configured, peer connections are plaintext");
            Transport::Plain
        }
    };

    let forwarder = forward_to_peers(state.events.subscribe(), state.broadcaster.clone());
    let server = NotifyServer::bind(addr, transport, Arc::new(state.ingestor())).await?;
    info!(
        %addr,
        base_url = %state.config.base_url,
        tls = tls_enabled,
        "Starting tagtrack notification listener"
    );

    let result = server
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("Shutdown signal received");
        })
        .await;

    forwarder.abort();
    state.journal.shutdown().await;
    result
}
