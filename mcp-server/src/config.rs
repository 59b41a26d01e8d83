use std::time::Duration;

use clap::{Parser, ValueEnum};
use market_data_services::{AggregatorConfig, CacheTtl, ProviderLimits};

use crate::lifecycle::LifecycleConfig;

/// Wire protocols the server can expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum Transport {
    Stdio,
    Rest,
    Rpc,
    Ws,
}

impl Transport {
    pub fn as_str(self) -> &'static str {
        match self {
            Transport::Stdio => "stdio",
            Transport::Rest => "rest",
            Transport::Rpc => "rpc",
            Transport::Ws => "ws",
        }
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "market-mcp-server")]
#[command(about = "MCP market-analysis server over stdio, REST, JSON-RPC and WebSocket")]
pub struct Cli {
    /// Host to bind the network listeners to
    #[arg(long, env = "MCP_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// HTTP REST port
    #[arg(long, env = "MCP_REST_PORT", default_value = "3000")]
    pub rest_port: u16,

    /// HTTP JSON-RPC port
    #[arg(long, env = "MCP_RPC_PORT", default_value = "3001")]
    pub rpc_port: u16,

    /// WebSocket JSON-RPC port
    #[arg(long, env = "MCP_WS_PORT", default_value = "3002")]
    pub ws_port: u16,

    /// Transports to enable
    #[arg(
        long,
        value_enum,
        value_delimiter = ',',
        default_values = ["stdio", "rest", "rpc", "ws"]
    )]
    pub transports: Vec<Transport>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value = "text")]
    pub log_format: LogFormat,

    /// Alpha Vantage API key; the backup equity provider is disabled without it
    #[arg(long, env = "ALPHA_VANTAGE_API_KEY")]
    pub alpha_vantage_key: Option<String>,

    #[arg(long, default_value = "900")]
    pub quote_ttl_secs: u64,

    #[arg(long, default_value = "3600")]
    pub historical_ttl_secs: u64,

    #[arg(long, default_value = "86400")]
    pub search_ttl_secs: u64,

    /// Requests per minute allowed against Yahoo Finance
    #[arg(long, default_value = "100")]
    pub yahoo_rpm: u32,

    /// Requests per minute allowed against Alpha Vantage
    #[arg(long, default_value = "5")]
    pub alpha_vantage_rpm: u32,

    /// Requests per minute allowed against CoinGecko
    #[arg(long, default_value = "30")]
    pub coingecko_rpm: u32,

    /// Requests per second accepted by the REST surface
    #[arg(long, default_value = "50")]
    pub rest_rps: u32,

    /// Disable the in-memory response cache
    #[arg(long)]
    pub no_cache: bool,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub rest_port: u16,
    pub rpc_port: u16,
    pub ws_port: u16,
    pub transports: Vec<Transport>,
    pub alpha_vantage_key: Option<String>,
    pub cache_enabled: bool,
    pub rest_rps: u32,
    pub aggregator: AggregatorConfig,
    pub lifecycle: LifecycleConfig,
}

impl ServerConfig {
    pub fn is_enabled(&self, transport: Transport) -> bool {
        self.transports.contains(&transport)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            rest_port: 3000,
            rpc_port: 3001,
            ws_port: 3002,
            transports: vec![Transport::Stdio, Transport::Rest, Transport::Rpc, Transport::Ws],
            alpha_vantage_key: None,
            cache_enabled: true,
            rest_rps: 50,
            aggregator: AggregatorConfig::default(),
            lifecycle: LifecycleConfig::default(),
        }
    }
}

impl From<&Cli> for ServerConfig {
    fn from(cli: &Cli) -> Self {
        let mut transports: Vec<Transport> = Vec::new();
        for t in &cli.transports {
            if !transports.contains(t) {
                transports.push(*t);
            }
        }

        let aggregator = AggregatorConfig {
            limits: ProviderLimits {
                equity_primary: cli.yahoo_rpm,
                equity_backup: cli.alpha_vantage_rpm,
                crypto: cli.coingecko_rpm,
            },
            ttl: CacheTtl {
                quote: Duration::from_secs(cli.quote_ttl_secs),
                historical: Duration::from_secs(cli.historical_ttl_secs),
                search: Duration::from_secs(cli.search_ttl_secs),
            },
            ..AggregatorConfig::default()
        };

        Self {
            host: cli.host.clone(),
            rest_port: cli.rest_port,
            rpc_port: cli.rpc_port,
            ws_port: cli.ws_port,
            transports,
            alpha_vantage_key: cli.alpha_vantage_key.clone(),
            cache_enabled: !cli.no_cache,
            rest_rps: cli.rest_rps,
            aggregator,
            lifecycle: LifecycleConfig::default(),
        }
    }
}
