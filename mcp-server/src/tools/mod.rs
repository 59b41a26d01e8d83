//! Tool Execution Core: the registry every transport calls through.

pub mod analysis;
pub mod market;
pub mod schema;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use market_data_services::{Aggregator, AnalysisStore, AttemptOutcome, NewAnalysis, ProviderAttempt};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::error::ToolError;
use crate::protocol::{ToolDefinition, ToolResult};

/// Collaborators a tool handler may use for one call.
#[derive(Clone)]
pub struct ToolContext {
    pub aggregator: Arc<Aggregator>,
    pub store: Option<Arc<dyn AnalysisStore>>,
    pub cancel: CancellationToken,
}

impl ToolContext {
    /// Store an analysis document. Failures are logged and swallowed.
    pub async fn record(&self, analysis: NewAnalysis) {
        let Some(store) = &self.store else {
            return;
        };
        let kind = analysis.output.analysis_type;
        let symbol = analysis.symbol.clone();
        if let Err(e) = store.store_analysis(analysis).await {
            tracing::warn!("Failed to store {} analysis for {}: {}", kind, symbol, e);
        }
    }

    pub fn ensure_not_cancelled(&self) -> Result<(), ToolError> {
        if self.cancel.is_cancelled() {
            return Err(ToolError::Execution("request cancelled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// JSON-schema subset understood by [`schema::validate`].
    fn input_schema(&self) -> Value;
    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value, ToolError>;
}

pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    aggregator: Arc<Aggregator>,
    store: Option<Arc<dyn AnalysisStore>>,
}

impl ToolRegistry {
    /// Registry with the built-in market tools.
    pub fn new(aggregator: Arc<Aggregator>, store: Option<Arc<dyn AnalysisStore>>) -> Self {
        let mut registry = Self::empty(aggregator, store);
        registry.register(Arc::new(market::GetStockQuote));
        registry.register(Arc::new(market::GetHistoricalData));
        registry.register(Arc::new(market::SearchSymbols));
        registry.register(Arc::new(analysis::TechnicalAnalysis));
        registry.register(Arc::new(market::GetMarketOverview));
        registry.register(Arc::new(analysis::GetAnalysisHistory));
        registry
    }

    pub fn empty(aggregator: Arc<Aggregator>, store: Option<Arc<dyn AnalysisStore>>) -> Self {
        Self {
            tools: Vec::new(),
            aggregator,
            store,
        }
    }

    /// Add a tool, replacing any tool already registered under the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    /// Check `args` against the named tool's schema without running it.
    pub fn validate_args(&self, name: &str, args: &Value) -> Result<(), ToolError> {
        let tool = self.lookup(name)?;
        schema::validate(&tool.input_schema(), args).map_err(ToolError::InvalidArguments)
    }

    fn lookup(&self, name: &str) -> Result<&Arc<dyn Tool>, ToolError> {
        self.get(name).ok_or_else(|| ToolError::UnknownTool {
            name: name.to_string(),
            available: self.names(),
        })
    }

    /// Run a tool and return its raw JSON output.
    ///
    /// Schema violations, handler errors and handler panics all come back as
    /// `Err`; nothing escapes to the transport.
    pub async fn invoke(
        &self,
        name: &str,
        args: Value,
        transport: &'static str,
        cancel: &CancellationToken,
    ) -> Result<Value, ToolError> {
        let started = Instant::now();
        let outcome = self.invoke_inner(name, args, cancel).await;
        let elapsed_ms = started.elapsed().as_millis();

        match &outcome {
            Ok(_) => tracing::info!(
                tool = name,
                transport,
                elapsed_ms = elapsed_ms as u64,
                is_error = false,
                "Tool call completed"
            ),
            Err(e) => tracing::warn!(
                tool = name,
                transport,
                elapsed_ms = elapsed_ms as u64,
                is_error = true,
                "Tool call failed: {}",
                e
            ),
        }
        outcome
    }

    async fn invoke_inner(
        &self,
        name: &str,
        args: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, ToolError> {
        let tool = self.lookup(name)?;
        let args = if args.is_null() { json!({}) } else { args };
        schema::validate(&tool.input_schema(), &args).map_err(ToolError::InvalidArguments)?;

        let ctx = ToolContext {
            aggregator: self.aggregator.clone(),
            store: self.store.clone(),
            cancel: cancel.clone(),
        };

        match AssertUnwindSafe(tool.call(&ctx, args)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "handler panicked".to_string());
                tracing::error!("Tool {} panicked: {}", name, message);
                Err(ToolError::Execution(format!("internal error: {}", message)))
            }
        }
    }

    /// Run a tool and wrap the outcome in the uniform `{content, isError}` envelope.
    pub async fn execute(
        &self,
        name: &str,
        args: Value,
        transport: &'static str,
        cancel: &CancellationToken,
    ) -> ToolResult {
        match self.invoke(name, args, transport, cancel).await {
            Ok(value) => ToolResult::json(&value),
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}

pub(crate) fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

/// One-line account of what each provider did, for "no data" messages.
pub(crate) fn describe_attempts(attempts: &[ProviderAttempt]) -> String {
    if attempts.is_empty() {
        return "no provider was attempted".to_string();
    }
    attempts
        .iter()
        .map(|a| {
            let what = match &a.outcome {
                AttemptOutcome::Success => "success".to_string(),
                AttemptOutcome::Empty => "no data".to_string(),
                AttemptOutcome::RateLimited => "rate limited".to_string(),
                AttemptOutcome::CircuitOpen => "circuit open".to_string(),
                AttemptOutcome::Failed { message } => format!("failed ({})", message),
            };
            format!("{}: {}", a.provider, what)
        })
        .collect::<Vec<_>>()
        .join("; ")
}

pub(crate) fn no_data(subject: &str, attempts: &[ProviderAttempt]) -> ToolError {
    ToolError::NoData {
        subject: subject.to_string(),
        detail: describe_attempts(attempts),
    }
}
