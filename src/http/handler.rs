//! Per-connection gateway logic.
//!
//! # States
//! ```text
//! Received ──▶ Classified ──┬──▶ Forwarding ──┬──▶ Completed
//!                           │                 └──▶ Failed
//!                           └──▶ Upgrading ───┬──▶ Completed (tunnel ran)
//!                                             └──▶ Failed
//! ```
//!
//! The handler owns the hijacked connection for its whole life. Paths that
//! keep it close it at the end of `serve_connection`; the upgrade path moves
//! it into the tunnel, which releases it. Either way it is dropped once.

use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::http::forward::PlainForwarder;
use crate::http::outbound::UpstreamTarget;
use crate::http::request::{read_request, HijackedConnection, InboundRequest, ReadLimits};
use crate::http::response::{write_empty_response, write_response};
use crate::observability::metrics;
use crate::upgrade::client::{UpgradeOutcome, UpstreamUpgradeClient};
use crate::upgrade::handshake::{ServerHandshaker, SwitchingProtocols, UpgradeDecision};
use crate::upgrade::tunnel::{TunnelPump, TunnelReport};

/// Where a connection currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    Received,
    Classified,
    Forwarding,
    Upgrading,
    Completed,
    Failed,
}

impl std::fmt::Display for HandlerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HandlerState::Received => "received",
            HandlerState::Classified => "classified",
            HandlerState::Forwarding => "forwarding",
            HandlerState::Upgrading => "upgrading",
            HandlerState::Completed => "completed",
            HandlerState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How a connection finished successfully.
#[derive(Debug)]
pub enum Completion {
    /// The client closed before sending a request.
    ClientGone,
    /// Plain request relayed.
    Forwarded { status: StatusCode, body_bytes: u64 },
    /// The upstream declined the upgrade; its response was relayed.
    UpgradeRefused { status: StatusCode },
    /// The upgrade succeeded and the tunnel has ended.
    Tunneled(TunnelReport),
}

/// Classifies each inbound request and forwards or tunnels it.
#[derive(Debug)]
pub struct GatewayHandler<H = SwitchingProtocols> {
    config: Arc<GatewayConfig>,
    target: UpstreamTarget,
    forwarder: PlainForwarder,
    upgrader: UpstreamUpgradeClient,
    pump: TunnelPump,
    handshaker: H,
}

impl GatewayHandler<SwitchingProtocols> {
    pub fn new(config: Arc<GatewayConfig>) -> Self {
        Self::with_handshaker(config, SwitchingProtocols)
    }
}

impl<H: ServerHandshaker> GatewayHandler<H> {
    pub fn with_handshaker(config: Arc<GatewayConfig>, handshaker: H) -> Self {
        let timeouts = &config.timeouts;
        Self {
            target: UpstreamTarget::new(&config.upstream),
            forwarder: PlainForwarder::new(timeouts.connect(), timeouts.upstream()),
            upgrader: UpstreamUpgradeClient::new(timeouts.connect(), timeouts.upstream()),
            pump: TunnelPump::new(config.limits.tunnel_buffer_bytes, timeouts.tunnel_idle()),
            handshaker,
            config,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Serve one hijacked connection to completion.
    pub async fn serve_connection<S>(&self, stream: S) -> Result<Completion, GatewayError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut conn = HijackedConnection::new(stream);
        trace_state(HandlerState::Received);

        let limits = ReadLimits {
            max_head_bytes: self.config.limits.max_head_bytes,
            max_body_bytes: self.config.limits.max_body_bytes,
        };
        let request = match read_request(&mut conn, limits).await {
            Ok(Some(request)) => request,
            Ok(None) => return Ok(Completion::ClientGone),
            Err(e) => {
                tracing::warn!(error = %e, "Unreadable request");
                abort(&mut conn, &e).await;
                conn.close().await;
                return Err(e);
            }
        };

        tracing::info!(method = %request.method, path = %request.target, "Request received");

        let decision = self.handshaker.read_handshake(&request.headers);
        trace_state(HandlerState::Classified);

        let result = match decision {
            UpgradeDecision::Upgrade(protocol) => self.upgrade(conn, &request, &protocol).await,
            UpgradeDecision::NotUpgrade | UpgradeDecision::Malformed => {
                let result = self.forward(&mut conn, &request).await;
                conn.close().await;
                result
            }
        };

        match &result {
            Ok(_) => trace_state(HandlerState::Completed),
            Err(e) => {
                trace_state(HandlerState::Failed);
                tracing::debug!(path = %request.target, error = %e, "Request failed");
            }
        }
        tracing::debug!(path = %request.target, "Handling done");
        result
    }

    async fn forward<S>(
        &self,
        conn: &mut HijackedConnection<S>,
        request: &InboundRequest,
    ) -> Result<Completion, GatewayError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        trace_state(HandlerState::Forwarding);

        let outbound = self.target.build(request).map_err(|e| {
            tracing::error!(path = %request.target, error = %e, "Cannot build upstream request");
            e
        })?;

        let response = match self.forwarder.round_trip(outbound).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(path = %request.target, error = %e, "Upstream request failed");
                metrics::record_request("plain", StatusCode::BAD_GATEWAY.as_u16());
                abort(conn, &e).await;
                return Err(e);
            }
        };

        let status = response.status();
        tracing::info!(status = %status, path = %request.target, "Upstream responded");
        metrics::record_request("plain", status.as_u16());

        let body_bytes = write_response(conn.stream_mut(), &request.method, response).await?;
        Ok(Completion::Forwarded { status, body_bytes })
    }

    async fn upgrade<S>(
        &self,
        mut conn: HijackedConnection<S>,
        request: &InboundRequest,
        protocol: &str,
    ) -> Result<Completion, GatewayError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        trace_state(HandlerState::Upgrading);
        tracing::info!(upgrade = %protocol, path = %request.target, "Inbound upgrade request");

        let outbound = self.target.build(request).map_err(|e| {
            tracing::error!(path = %request.target, error = %e, "Cannot build upstream request");
            e
        })?;

        let upstream = match self.upgrader.round_trip(outbound).await {
            Ok(UpgradeOutcome::Switched(upstream)) => upstream,
            Ok(UpgradeOutcome::Refused(response)) => {
                let status = response.status();
                tracing::warn!(status = %status, path = %request.target, "Upstream refused upgrade");
                metrics::record_request("upgrade", status.as_u16());
                write_response(conn.stream_mut(), &request.method, response).await?;
                conn.close().await;
                return Ok(Completion::UpgradeRefused { status });
            }
            Err(e) => {
                // Nothing is written back; the client only sees the close.
                tracing::error!(path = %request.target, error = %e, "Upstream upgrade failed");
                metrics::record_request("upgrade", StatusCode::BAD_GATEWAY.as_u16());
                conn.close().await;
                return Err(e);
            }
        };
        tracing::info!(path = %request.target, "Outbound upgrade accepted");

        if let Err(e) = self
            .handshaker
            .accept_handshake(conn.stream_mut(), &upstream.response)
            .await
        {
            tracing::warn!(path = %request.target, error = %e, "Inbound upgrade could not be confirmed");
            let _ = self.handshaker.reject_handshake(conn.stream_mut()).await;
            conn.close().await;
            return Err(e.into());
        }
        tracing::info!(path = %request.target, "Inbound upgrade accepted");
        metrics::record_request("upgrade", StatusCode::SWITCHING_PROTOCOLS.as_u16());

        let _active = metrics::ActiveTunnel::open();
        let report = self.pump.run(conn.into_stream(), upstream.io).await;
        metrics::record_tunnel(&report);

        tracing::info!(
            path = %request.target,
            closed_by = ?report.closed_by,
            client_to_upstream_bytes = report.client_to_upstream.bytes,
            upstream_to_client_bytes = report.upstream_to_client.bytes,
            duration_ms = duration_ms(report.duration),
            "Tunnel closed"
        );
        Ok(Completion::Tunneled(report))
    }
}

/// Best-effort error response for failures that happen before anything reached the client.
async fn abort<S>(conn: &mut HijackedConnection<S>, error: &GatewayError)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if let Some(status) = error.client_status() {
        let _ = write_empty_response(conn.stream_mut(), status).await;
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn trace_state(state: HandlerState) {
    tracing::trace!(state = %state, "Gateway state");
}
