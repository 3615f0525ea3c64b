//! Server-side half of the upgrade handshake.
//!
//! A [`ServerHandshaker`] decides whether an inbound request is an upgrade
//! attempt and, once the upstream has switched protocols, confirms the switch
//! to the client. [`SwitchingProtocols`] is the HTTP/1.1 `101` flavour.

use std::future::Future;
use std::io;

use http::header::{CONNECTION, UPGRADE};
use http::response::Parts;
use http::{HeaderMap, StatusCode};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::http::response::{encode_headers, encode_status_line, write_status_only};

/// Classification of an inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeDecision {
    /// Ordinary request; forward it as-is.
    NotUpgrade,
    /// Upgrade attempt to the named protocol.
    Upgrade(String),
    /// An upgrade attempt the handshaker cannot make sense of. The gateway
    /// routes it like `NotUpgrade`.
    Malformed,
}

impl UpgradeDecision {
    /// Status a standalone handshake endpoint would answer with.
    pub fn handshake_status(&self) -> StatusCode {
        match self {
            UpgradeDecision::Upgrade(_) => StatusCode::SWITCHING_PROTOCOLS,
            UpgradeDecision::NotUpgrade | UpgradeDecision::Malformed => StatusCode::BAD_REQUEST,
        }
    }

    pub fn protocol(&self) -> Option<&str> {
        match self {
            UpgradeDecision::Upgrade(protocol) => Some(protocol),
            _ => None,
        }
    }
}

/// Read-and-classify / write-and-confirm capability for one upgrade flavour.
pub trait ServerHandshaker: Send + Sync {
    /// Classify the inbound request from its headers. Pure.
    fn read_handshake(&self, headers: &HeaderMap) -> UpgradeDecision;

    /// Confirm the switch to the client, mirroring the upstream's interim
    /// response, and flush.
    fn accept_handshake<W>(
        &self,
        writer: &mut W,
        upstream: &Parts,
    ) -> impl Future<Output = io::Result<()>> + Send
    where
        W: AsyncWrite + Unpin + Send;

    /// Best-effort refusal after `accept_handshake` failed.
    fn reject_handshake<W>(&self, writer: &mut W) -> impl Future<Output = io::Result<()>> + Send
    where
        W: AsyncWrite + Unpin + Send,
    {
        write_status_only(writer, StatusCode::BAD_REQUEST)
    }
}

/// HTTP/1.1 `Upgrade` handshake answered with `101 Switching Protocols`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SwitchingProtocols;

impl ServerHandshaker for SwitchingProtocols {
    fn read_handshake(&self, headers: &HeaderMap) -> UpgradeDecision {
        classify(headers)
    }

    async fn accept_handshake<W>(&self, writer: &mut W, upstream: &Parts) -> io::Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        // Fixed status line; the upstream's reason phrase is not mirrored.
        let mut head = Vec::with_capacity(256);
        encode_status_line(&mut head, StatusCode::SWITCHING_PROTOCOLS, None);
        encode_headers(&mut head, &upstream.headers);
        head.extend_from_slice(b"\r\n");
        writer.write_all(&head).await?;
        writer.flush().await
    }
}

/// Upgrade iff `Upgrade` is non-empty and `Connection` mentions "upgrade".
///
/// The `Connection` check is a case-insensitive substring match, not a token
/// parse, so `keep-alive, Upgrade` and `NoUpgradeAllowed` both qualify.
pub fn classify(headers: &HeaderMap) -> UpgradeDecision {
    let protocol = headers
        .get(UPGRADE)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .unwrap_or_default();
    if protocol.is_empty() {
        return UpgradeDecision::NotUpgrade;
    }

    let connection_mentions_upgrade = headers
        .get(CONNECTION)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).to_ascii_lowercase().contains("upgrade"))
        .unwrap_or(false);
    if !connection_mentions_upgrade {
        return UpgradeDecision::NotUpgrade;
    }

    UpgradeDecision::Upgrade(protocol)
}
