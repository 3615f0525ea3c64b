//! Per-request failure taxonomy.
//!
//! Every variant is terminal for the request that produced it. The handler
//! logs the error at the point of failure and closes the connection; nothing
//! is retried.

use std::io;

use http::StatusCode;

/// Errors raised while serving a single inbound connection.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The request head could not be parsed.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// The request head exceeded the configured limit.
    #[error("request head exceeds {0} bytes")]
    HeadTooLarge(usize),

    /// The request body exceeded the configured limit.
    #[error("request body exceeds {0} bytes")]
    BodyTooLarge(usize),

    /// `api_server` + request target did not form a usable upstream URL.
    #[error("invalid upstream url {url:?}: {reason}")]
    InvalidUpstreamUrl { url: String, reason: String },

    /// TCP connect to the upstream failed.
    #[error("connect to upstream {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The pooled client failed the round-trip.
    #[error("upstream request failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),

    /// HTTP/1 protocol error on a dedicated upstream connection.
    #[error("upstream protocol error: {0}")]
    Protocol(#[from] hyper::Error),

    /// A deadline elapsed.
    #[error("timed out during {0}")]
    Timeout(&'static str),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl GatewayError {
    /// Status written back to the client when this error aborts a plain request
    /// before anything else reached the wire. `None` means close silently.
    pub fn client_status(&self) -> Option<StatusCode> {
        match self {
            GatewayError::MalformedRequest(_) => Some(StatusCode::BAD_REQUEST),
            GatewayError::HeadTooLarge(_) => Some(StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE),
            GatewayError::BodyTooLarge(_) => Some(StatusCode::PAYLOAD_TOO_LARGE),
            GatewayError::Connect { .. }
            | GatewayError::Upstream(_)
            | GatewayError::Protocol(_)
            | GatewayError::Timeout(_) => Some(StatusCode::BAD_GATEWAY),
            GatewayError::InvalidUpstreamUrl { .. } | GatewayError::Io(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_failures_map_to_bad_gateway() {
        let err = GatewayError::Timeout("upstream round-trip");
        assert_eq!(err.client_status(), Some(StatusCode::BAD_GATEWAY));

        let err = GatewayError::Connect {
            addr: "127.0.0.1:1".into(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        assert_eq!(err.client_status(), Some(StatusCode::BAD_GATEWAY));
    }

    #[test]
    fn url_errors_close_silently() {
        let err = GatewayError::InvalidUpstreamUrl {
            url: "/x".into(),
            reason: "relative".into(),
        };
        assert_eq!(err.client_status(), None);
    }
}
