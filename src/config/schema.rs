//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// The single upstream API server and its credentials.
    pub upstream: UpstreamConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Size limits for heads, bodies and tunnel buffers.
    pub limits: LimitsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., ":12345" or "127.0.0.1:8080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// How long in-flight connections may keep running after shutdown starts.
    pub drain_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: ":12345".to_string(),
            max_connections: 10_000,
            drain_timeout_secs: 30,
        }
    }
}

impl ListenerConfig {
    /// Bind address in `host:port` form. A bare `:port` means every interface.
    pub fn socket_address(&self) -> String {
        if self.bind_address.starts_with(':') {
            format!("0.0.0.0{}", self.bind_address)
        } else {
            self.bind_address.clone()
        }
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

/// Upstream server definition.
#[derive(Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL every request target is appended to (e.g., "http://10.0.0.2:8080").
    pub api_server: String,

    /// Basic-auth user injected into every outbound request (empty is still sent).
    pub username: String,

    /// Basic-auth password injected into every outbound request.
    pub password: String,
}

impl UpstreamConfig {
    /// Whether a username or password is configured.
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty() || !self.password.is_empty()
    }
}

impl std::fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("api_server", &self.api_server)
            .field("username", &self.username)
            .field("password", &if self.password.is_empty() { "" } else { "***" })
            .finish()
    }
}

/// Timeout configuration. A value of zero disables the deadline.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Upstream round-trip timeout (plain request or upgrade handshake) in seconds.
    pub upstream_secs: u64,

    /// Tunnel idle timeout: no bytes in either direction for this long closes both legs.
    pub tunnel_idle_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            upstream_secs: 30,
            tunnel_idle_secs: 0,
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Option<Duration> {
        non_zero_secs(self.connect_secs)
    }

    pub fn upstream(&self) -> Option<Duration> {
        non_zero_secs(self.upstream_secs)
    }

    pub fn tunnel_idle(&self) -> Option<Duration> {
        non_zero_secs(self.tunnel_idle_secs)
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Size limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum size of an inbound request head.
    pub max_head_bytes: usize,

    /// Maximum size of a forwarded request body.
    pub max_body_bytes: usize,

    /// Per-direction copy buffer inside a tunnel.
    pub tunnel_buffer_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_head_bytes: 64 * 1024,
            max_body_bytes: 16 * 1024 * 1024,
            tunnel_buffer_bytes: 8 * 1024,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log line format.
    pub log_format: LogFormat,

    /// Enable the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Prometheus scrape address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_port_binds_all_interfaces() {
        let listener = ListenerConfig::default();
        assert_eq!(listener.socket_address(), "0.0.0.0:12345");

        let listener = ListenerConfig {
            bind_address: "127.0.0.1:8080".into(),
            ..ListenerConfig::default()
        };
        assert_eq!(listener.socket_address(), "127.0.0.1:8080");
    }

    #[test]
    fn zero_disables_timeouts() {
        let timeouts = TimeoutConfig::default();
        assert_eq!(timeouts.connect(), Some(Duration::from_secs(5)));
        assert_eq!(timeouts.tunnel_idle(), None);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [upstream]
            api_server = "http://api:8080"

            [observability]
            log_format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.upstream.api_server, "http://api:8080");
        assert_eq!(config.listener.bind_address, ":12345");
        assert_eq!(config.observability.log_format, LogFormat::Json);
        assert!(!config.upstream.has_credentials());
    }

    #[test]
    fn debug_hides_password() {
        let upstream = UpstreamConfig {
            api_server: String::new(),
            username: "svc".into(),
            password: "hunter2".into(),
        };
        let rendered = format!("{:?}", upstream);
        assert!(!rendered.contains("hunter2"));
        assert!(upstream.has_credentials());
    }
}
