//! Upgrade round-trip against the upstream.
//!
//! # Data Flow
//! ```text
//! OutboundRequest (Upgrade/Connection headers intact)
//!     → fresh TCP connection to the upstream authority
//!     → hyper HTTP/1 client connection, upgrades enabled
//!     → 101: hyper hands back the raw connection (UpstreamConnection)
//!     → anything else: the response is returned untouched (Refused)
//! ```
//!
//! Each upgrade gets its own connection; a pooled one could not be handed
//! over to a tunnel anyway.

use std::time::Duration;

use http::response::Parts;
use http::{Response, StatusCode, Uri};
use hyper::body::Incoming;
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;

use crate::error::GatewayError;
use crate::http::outbound::OutboundRequest;

/// Raw upstream connection after a successful protocol switch, plus the
/// interim response to mirror to the client.
#[derive(Debug)]
pub struct UpstreamConnection {
    pub io: TokioIo<Upgraded>,
    pub response: Parts,
}

/// Result of an upgrade round-trip.
#[derive(Debug)]
pub enum UpgradeOutcome {
    /// The upstream switched protocols.
    Switched(UpstreamConnection),
    /// The upstream answered with an ordinary response; no tunnel.
    Refused(Response<Incoming>),
}

/// Performs the client side of the upgrade handshake with the upstream.
#[derive(Debug, Clone, Default)]
pub struct UpstreamUpgradeClient {
    connect_timeout: Option<Duration>,
    round_trip_timeout: Option<Duration>,
}

impl UpstreamUpgradeClient {
    pub fn new(connect_timeout: Option<Duration>, round_trip_timeout: Option<Duration>) -> Self {
        Self {
            connect_timeout,
            round_trip_timeout,
        }
    }

    /// Send `request` and wait for the upstream's verdict.
    pub async fn round_trip(&self, mut request: OutboundRequest) -> Result<UpgradeOutcome, GatewayError> {
        let addr = upstream_addr(&request)?;
        // A direct connection expects origin-form ("/path?query"), not the absolute URL.
        *request.uri_mut() = origin_form(request.uri())?;
        let stream = with_deadline(self.connect_timeout, "upstream connect", async {
            TcpStream::connect(&addr)
                .await
                .map_err(|source| GatewayError::Connect {
                    addr: addr.clone(),
                    source,
                })
        })
        .await?;
        let _ = stream.set_nodelay(true);

        let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;

        // Drives the HTTP/1 exchange; resolves once the connection is upgraded or closed.
        let driver_addr = addr.clone();
        tokio::spawn(async move {
            if let Err(e) = connection.with_upgrades().await {
                tracing::debug!(upstream = %driver_addr, error = %e, "Upstream connection ended");
            }
        });

        let mut response =
            with_deadline(self.round_trip_timeout, "upgrade round-trip", async {
                sender.send_request(request).await.map_err(GatewayError::from)
            })
            .await?;

        if response.status() != StatusCode::SWITCHING_PROTOCOLS {
            return Ok(UpgradeOutcome::Refused(response));
        }

        let upgraded = with_deadline(self.round_trip_timeout, "upgrade takeover", async {
            hyper::upgrade::on(&mut response).await.map_err(GatewayError::from)
        })
        .await?;
        let (parts, _) = response.into_parts();

        Ok(UpgradeOutcome::Switched(UpstreamConnection {
            io: TokioIo::new(upgraded),
            response: parts,
        }))
    }
}

/// `host:port` to dial for an absolute request URI.
fn upstream_addr(request: &OutboundRequest) -> Result<String, GatewayError> {
    let uri = request.uri();
    let host = uri.host().ok_or_else(|| GatewayError::InvalidUpstreamUrl {
        url: uri.to_string(),
        reason: "missing host".to_string(),
    })?;
    if uri.scheme_str().is_some_and(|s| s != "http") {
        return Err(GatewayError::InvalidUpstreamUrl {
            url: uri.to_string(),
            reason: "only http upstreams are supported".to_string(),
        });
    }
    let port = uri.port_u16().unwrap_or(80);
    Ok(format!("{}:{}", host, port))
}

fn origin_form(uri: &Uri) -> Result<Uri, GatewayError> {
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    path.parse().map_err(|e: http::uri::InvalidUri| GatewayError::InvalidUpstreamUrl {
        url: uri.to_string(),
        reason: e.to_string(),
    })
}

async fn with_deadline<T, F>(deadline: Option<Duration>, stage: &'static str, fut: F) -> Result<T, GatewayError>
where
    F: std::future::Future<Output = Result<T, GatewayError>>,
{
    match deadline {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| GatewayError::Timeout(stage))?,
        None => fut.await,
    }
}
