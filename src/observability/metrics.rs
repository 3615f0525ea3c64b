//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by path (`plain`/`upgrade`) and status
//! - `gateway_tunnels_total` (counter): finished tunnels by what closed them
//! - `gateway_tunnel_bytes_total` (counter): tunnelled bytes by direction
//! - `gateway_active_tunnels` (gauge): tunnels currently running
//! - `gateway_tunnel_duration_seconds` (histogram): tunnel lifetime
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::upgrade::tunnel::{ClosedBy, TunnelReport};

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record an answered request.
pub fn record_request(path: &'static str, status: u16) {
    counter!("gateway_requests_total", "path" => path, "status" => status.to_string()).increment(1);
}

/// Record a finished tunnel.
pub fn record_tunnel(report: &TunnelReport) {
    let closed_by = match report.closed_by {
        ClosedBy::Direction(direction) => direction.as_str(),
        ClosedBy::IdleTimeout => "idle_timeout",
    };
    counter!("gateway_tunnels_total", "closed_by" => closed_by).increment(1);
    counter!("gateway_tunnel_bytes_total", "direction" => "client_to_upstream")
        .increment(report.client_to_upstream.bytes);
    counter!("gateway_tunnel_bytes_total", "direction" => "upstream_to_client")
        .increment(report.upstream_to_client.bytes);
    histogram!("gateway_tunnel_duration_seconds").record(report.duration.as_secs_f64());
}

/// Keeps `gateway_active_tunnels` raised while alive.
#[derive(Debug)]
pub struct ActiveTunnel(());

impl ActiveTunnel {
    pub fn open() -> Self {
        gauge!("gateway_active_tunnels").increment(1.0);
        Self(())
    }
}

impl Drop for ActiveTunnel {
    fn drop(&mut self) {
        gauge!("gateway_active_tunnels").decrement(1.0);
    }
}
