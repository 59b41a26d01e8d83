use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use market_data_services::events::DEFAULT_EVENT_CAPACITY;
use market_data_services::{
    event_channel, spawn_event_logger, Aggregator, AnalysisStore, InMemoryAnalysisStore,
    MemoryCacheStore, ProviderEvent,
};

use crate::config::{ServerConfig, Transport};
use crate::dispatcher::Dispatcher;
use crate::lifecycle::{ConnectionEvent, ConnectionManager};
use crate::tools::ToolRegistry;
use crate::transport::{rest, rpc_http, stdio, websocket};

/// Market MCP server: one tool registry behind every enabled transport.
pub struct McpServer {
    config: ServerConfig,
    registry: Arc<ToolRegistry>,
    dispatcher: Arc<Dispatcher>,
}

impl McpServer {
    /// Build the aggregator, stores and tool registry.
    pub fn new(config: ServerConfig) -> Self {
        tracing::info!("Initializing market data components...");

        let (provider_events, provider_rx) = event_channel::<ProviderEvent>(DEFAULT_EVENT_CAPACITY);
        spawn_event_logger(provider_rx, "providers");

        let mut aggregator = Aggregator::with_default_providers(
            config.aggregator.clone(),
            config.alpha_vantage_key.clone(),
        )
        .with_events(provider_events);
        if config.cache_enabled {
            aggregator = aggregator.with_cache(Arc::new(MemoryCacheStore::new()));
        } else {
            tracing::info!("Response cache disabled");
        }

        let store: Arc<dyn AnalysisStore> = Arc::new(InMemoryAnalysisStore::new());
        let registry = Arc::new(ToolRegistry::new(Arc::new(aggregator), Some(store)));
        let dispatcher = Arc::new(Dispatcher::new(registry.clone()));

        tracing::info!(
            "Registered {} tools over providers: {}",
            registry.len(),
            registry.aggregator().provider_ids().join(", ")
        );

        Self {
            config,
            registry,
            dispatcher,
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    async fn bind(&self, transport: Transport, port: u16) -> Result<Option<TcpListener>> {
        if !self.config.is_enabled(transport) {
            return Ok(None);
        }
        let addr = format!("{}:{}", self.config.host, port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {} listener to {}", transport, addr))?;
        tracing::info!("{} transport listening on {}", transport, addr);
        Ok(Some(listener))
    }

    /// Serve every enabled transport until `shutdown` is cancelled (or stdin
    /// closes when stdio is the only transport).
    ///
    /// Every listener is bound before anything is served; a bind failure is
    /// returned immediately.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let rest_listener = self.bind(Transport::Rest, self.config.rest_port).await?;
        let rpc_listener = self.bind(Transport::Rpc, self.config.rpc_port).await?;
        let ws_listener = self.bind(Transport::Ws, self.config.ws_port).await?;

        let mut servers: JoinSet<Result<()>> = JoinSet::new();

        if let Some(listener) = rest_listener {
            let state = rest::RestState::new(self.registry.clone(), self.config.rest_rps, shutdown.clone());
            let token = shutdown.clone();
            servers.spawn(async move {
                axum::serve(listener, rest::router(state))
                    .with_graceful_shutdown(async move { token.cancelled().await })
                    .await
                    .context("REST server failed")
            });
        }

        if let Some(listener) = rpc_listener {
            let state = rpc_http::RpcState::new(self.dispatcher.clone(), shutdown.clone());
            let token = shutdown.clone();
            servers.spawn(async move {
                axum::serve(listener, rpc_http::router(state))
                    .with_graceful_shutdown(async move { token.cancelled().await })
                    .await
                    .context("JSON-RPC server failed")
            });
        }

        if let Some(listener) = ws_listener {
            let (conn_events, conn_rx) = event_channel::<ConnectionEvent>(DEFAULT_EVENT_CAPACITY);
            spawn_event_logger(conn_rx, "connections");

            let manager = Arc::new(
                ConnectionManager::new(self.config.lifecycle.clone()).with_events(conn_events),
            );
            manager.clone().run_sweeper(shutdown.clone());

            let state = websocket::WsState::new(self.dispatcher.clone(), manager.clone(), shutdown.clone());
            let token = shutdown.clone();
            servers.spawn(async move {
                // The listener closes only after every connection has been resolved.
                axum::serve(listener, websocket::router(state))
                    .with_graceful_shutdown(async move {
                        token.cancelled().await;
                        manager.shutdown().await;
                    })
                    .await
                    .context("WebSocket server failed")
            });
        }

        if self.config.is_enabled(Transport::Stdio) {
            let only_stdio = self.config.transports == [Transport::Stdio];
            let dispatcher = self.dispatcher.clone();
            let token = shutdown.clone();
            servers.spawn(async move {
                stdio::serve(dispatcher, tokio::io::stdin(), tokio::io::stdout(), token.clone()).await?;
                if only_stdio {
                    token.cancel();
                }
                Ok(())
            });
        }

        if servers.is_empty() {
            anyhow::bail!("No transports enabled");
        }

        let mut outcome = Ok(());
        while let Some(joined) = servers.join_next().await {
            let result = joined.context("transport task panicked").and_then(|r| r);
            if let Err(e) = result {
                tracing::error!("{:#}", e);
                shutdown.cancel();
                if outcome.is_ok() {
                    outcome = Err(e);
                }
            }
        }

        tracing::info!("All transports stopped");
        outcome
    }
}
