use std::sync::Arc;

use clap::Parser;

use upgrade_gateway::config::{resolve_config, Cli};
use upgrade_gateway::lifecycle::{signals, Shutdown};
use upgrade_gateway::net::Listener;
use upgrade_gateway::observability::{logging, metrics};
use upgrade_gateway::GatewayServer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    logging::init_logging(config.observability.log_format)?;
    tracing::info!("upgrade-gateway v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        bind_address = %config.listener.socket_address(),
        api_server = %config.upstream.api_server,
        credentials = config.upstream.has_credentials(),
        max_connections = config.listener.max_connections,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = Listener::bind(&config.listener).await?;

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(signals::watch_signals(shutdown.clone()));

    let server = GatewayServer::new(Arc::new(config));
    server.run(listener, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
