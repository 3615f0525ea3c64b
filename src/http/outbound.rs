//! Outbound request construction.
//!
//! # Responsibilities
//! - Join the configured upstream base URL with the inbound request target
//! - Clone inbound headers, pointing `Host` at the upstream
//! - Inject the static basic-auth credentials into every request, even empty ones

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use http::{HeaderValue, Request, Uri, Version};
use http_body_util::Full;

use crate::config::UpstreamConfig;
use crate::error::GatewayError;
use crate::http::request::InboundRequest;

/// Request sent to the upstream, built fresh for every inbound request.
pub type OutboundRequest = Request<Full<Bytes>>;

/// Where outbound requests go and which credentials they carry.
#[derive(Clone)]
pub struct UpstreamTarget {
    base: String,
    authorization: HeaderValue,
}

impl std::fmt::Debug for UpstreamTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamTarget")
            .field("base", &self.base)
            .field("authorization", &"Basic ***")
            .finish()
    }
}

impl UpstreamTarget {
    pub fn new(config: &UpstreamConfig) -> Self {
        Self {
            base: config.api_server.clone(),
            authorization: basic_auth(&config.username, &config.password),
        }
    }

    /// Upstream URL for a request target. Plain concatenation: the target is
    /// appended to the base as received.
    pub fn url_for(&self, target: &str) -> Result<Uri, GatewayError> {
        let url = format!("{}{}", self.base, target);
        let uri: Uri = url.parse().map_err(|e: http::uri::InvalidUri| {
            GatewayError::InvalidUpstreamUrl {
                url: url.clone(),
                reason: e.to_string(),
            }
        })?;
        if uri.scheme().is_none() || uri.authority().is_none() {
            return Err(GatewayError::InvalidUpstreamUrl {
                url,
                reason: "not an absolute URL".to_string(),
            });
        }
        Ok(uri)
    }

    /// Build the outbound request mirroring `inbound`.
    pub fn build(&self, inbound: &InboundRequest) -> Result<OutboundRequest, GatewayError> {
        let uri = self.url_for(&inbound.target)?;

        let mut headers = inbound.headers.clone();
        headers.remove(HOST);
        // The body was de-framed on the way in; the client layer re-frames it.
        headers.remove(TRANSFER_ENCODING);
        headers.remove(CONTENT_LENGTH);
        if let Some(authority) = uri.authority() {
            let host = HeaderValue::from_str(authority.as_str()).map_err(|e| {
                GatewayError::InvalidUpstreamUrl {
                    url: uri.to_string(),
                    reason: e.to_string(),
                }
            })?;
            headers.insert(HOST, host);
        }
        if !inbound.body.is_empty() {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(inbound.body.len()));
        }
        headers.insert(AUTHORIZATION, self.authorization.clone());

        let mut request = Request::builder()
            .method(inbound.method.clone())
            .uri(uri)
            .version(Version::HTTP_11)
            .body(Full::new(inbound.body.clone()))
            .map_err(|e| GatewayError::InvalidUpstreamUrl {
                url: inbound.target.clone(),
                reason: e.to_string(),
            })?;
        *request.headers_mut() = headers;
        Ok(request)
    }
}

fn basic_auth(username: &str, password: &str) -> HeaderValue {
    let encoded = STANDARD.encode(format!("{}:{}", username, password));
    let mut value = HeaderValue::from_str(&format!("Basic {}", encoded))
        .unwrap_or_else(|_| HeaderValue::from_static("Basic"));
    value.set_sensitive(true);
    value
}
