//! Gateway server: accept loop and connection dispatch.
//!
//! # Responsibilities
//! - Accept connections from the bounded listener
//! - Hand each raw connection to the gateway handler in its own task
//! - Stop accepting on shutdown, then drain in-flight connections

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::Instrument;

use crate::config::GatewayConfig;
use crate::http::handler::{Completion, GatewayHandler};
use crate::net::{ConnectionTracker, Listener, ListenerError};

/// Forwarding gateway server.
pub struct GatewayServer {
    handler: Arc<GatewayHandler>,
    tracker: ConnectionTracker,
}

impl GatewayServer {
    /// Create a new server with the given configuration.
    pub fn new(config: Arc<GatewayConfig>) -> Self {
        if config.upstream.api_server.is_empty() {
            tracing::warn!("No upstream configured (API_SERVER is empty); every request will fail");
        }
        Self {
            handler: Arc::new(GatewayHandler::new(config)),
            tracker: ConnectionTracker::new(),
        }
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &GatewayConfig {
        self.handler.config()
    }

    /// Live connection tracker, for observing in-flight work.
    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Run the accept loop until `shutdown` fires, then drain.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        let addr = listener.local_addr().map_err(ListenerError::Bind)?;
        tracing::info!(address = %addr, "Gateway server starting");

        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = shutdown.recv() => break,
            };

            let (stream, peer, permit) = match accepted {
                Ok(accepted) => accepted,
                Err(ListenerError::Accept(e)) => {
                    tracing::warn!(error = %e, "Accept failed");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let _ = stream.set_nodelay(true);

            let guard = self.tracker.track();
            let handler = Arc::clone(&self.handler);
            let span = tracing::info_span!("connection", connection_id = %guard.id(), peer = %peer);

            tokio::spawn(
                async move {
                    match handler.serve_connection(stream).await {
                        Ok(Completion::ClientGone) => tracing::debug!("Client closed before sending a request"),
                        Ok(_) => {}
                        Err(e) => tracing::debug!(error = %e, "Connection ended with error"),
                    }
                    drop(guard);
                    drop(permit);
                }
                .instrument(span),
            );
        }

        let active = self.tracker.active_count();
        tracing::info!(active_connections = active, "Stopped accepting, draining connections");
        let drain = self.config().listener.drain_timeout();
        if !self.tracker.wait_idle(drain).await {
            tracing::warn!(
                remaining = self.tracker.active_count(),
                drain_timeout_secs = drain.as_secs(),
                "Drain deadline passed, abandoning open connections"
            );
        }

        tracing::info!("Gateway server stopped");
        Ok(())
    }
}
