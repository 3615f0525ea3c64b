//! Plain (non-upgrade) round-trips through a pooled client.

use std::time::Duration;

use bytes::Bytes;
use http::Response;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;

use crate::error::GatewayError;
use crate::http::outbound::OutboundRequest;

/// Sends ordinary requests to the upstream and hands back its response.
#[derive(Clone, Debug)]
pub struct PlainForwarder {
    client: Client<HttpConnector, Full<Bytes>>,
    timeout: Option<Duration>,
}

impl PlainForwarder {
    pub fn new(connect_timeout: Option<Duration>, timeout: Option<Duration>) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(connect_timeout);
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new()).build(connector);
        Self { client, timeout }
    }

    /// Perform the round-trip. The response body is still streaming when this returns.
    pub async fn round_trip(&self, request: OutboundRequest) -> Result<Response<Incoming>, GatewayError> {
        let pending = self.client.request(request);
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, pending)
                .await
                .map_err(|_| GatewayError::Timeout("upstream round-trip"))?
                .map_err(GatewayError::from),
            None => pending.await.map_err(GatewayError::from),
        }
    }
}
