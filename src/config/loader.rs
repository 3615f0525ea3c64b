//! Configuration loading from disk, the command line and the environment.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Command line of the gateway binary.
///
/// Each flag falls back to the environment variable of the same meaning, and
/// anything set here wins over the config file.
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "upgrade-gateway")]
#[command(about = "Forwarding gateway with protocol-upgrade tunnelling", long_about = None)]
pub struct Cli {
    /// Optional TOML config file.
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to listen on (":12345" binds every interface).
    #[arg(long, env = "LISTEN_ADDR")]
    pub listen_addr: Option<String>,

    /// Upstream base URL.
    #[arg(long, env = "API_SERVER")]
    pub api_server: Option<String>,

    /// Basic-auth user for outbound requests.
    #[arg(long, env = "USERNAME")]
    pub username: Option<String>,

    /// Basic-auth password for outbound requests.
    #[arg(long, env = "PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

impl Cli {
    /// Copy every value that was set onto `config`.
    pub fn apply(&self, config: &mut GatewayConfig) {
        if let Some(addr) = &self.listen_addr {
            config.listener.bind_address = addr.clone();
        }
        if let Some(server) = &self.api_server {
            config.upstream.api_server = server.clone();
        }
        if let Some(username) = &self.username {
            config.upstream.username = username.clone();
        }
        if let Some(password) = &self.password {
            config.upstream.password = password.clone();
        }
    }
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: GatewayConfig = toml::from_str(&content)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Build the effective configuration: defaults, then the file, then the CLI/env.
pub fn resolve_config(cli: &Cli) -> Result<GatewayConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        }
        None => GatewayConfig::default(),
    };
    cli.apply(&mut config);

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}
