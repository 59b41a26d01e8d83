use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mcp_server::{Cli, LogFormat, McpServer, ServerConfig};

fn init_tracing(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "market_mcp_server={0},mcp_server={0},market_data_services={0},market_analysis={0},market_core={0},tower_http={0}",
            cli.log_level
        ))
    });

    // stdout belongs to the stdio transport.
    let registry = tracing_subscriber::registry().with(filter);
    match cli.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let config = ServerConfig::from(&cli);
    tracing::info!("Market MCP Server starting");
    tracing::info!("Configuration:");
    tracing::info!("  Host: {}", config.host);
    tracing::info!(
        "  Transports: {}",
        config
            .transports
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(",")
    );
    tracing::info!(
        "  Ports: rest={} rpc={} ws={}",
        config.rest_port,
        config.rpc_port,
        config.ws_port
    );
    tracing::info!("  Cache: {}", if config.cache_enabled { "on" } else { "off" });

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown signal received");
                signal_token.cancel();
            }
            Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
        }
    });

    McpServer::new(config).run(shutdown).await?;

    tracing::info!("Market MCP Server stopped");
    Ok(())
}
