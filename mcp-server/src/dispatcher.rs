//! JSON-RPC method surface shared by stdio, HTTP-JSON-RPC and WebSocket.

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::error::RpcError;
use crate::protocol::{CallToolParams, JsonRpcRequest, JsonRpcResponse, JSONRPC_VERSION, MCP_PROTOCOL_VERSION};
use crate::tools::ToolRegistry;

pub const SERVER_NAME: &str = "market-mcp-server";
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    started_at: Instant,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            started_at: Instant::now(),
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Process one raw message. `None` means nothing should be written back
    /// (a notification or a batch of notifications).
    pub async fn handle_text(
        &self,
        raw: &str,
        transport: &'static str,
        cancel: &CancellationToken,
    ) -> Option<Value> {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => self.handle_value(value, transport, cancel).await,
            Err(e) => {
                tracing::debug!("Unparseable message on {}: {}", transport, e);
                Some(response_value(RpcError::ParseError(e.to_string()).into_response(None)))
            }
        }
    }

    pub async fn handle_value(
        &self,
        value: Value,
        transport: &'static str,
        cancel: &CancellationToken,
    ) -> Option<Value> {
        match value {
            Value::Array(batch) if batch.is_empty() => Some(response_value(
                RpcError::InvalidRequest("empty batch".to_string()).into_response(None),
            )),
            Value::Array(batch) => {
                let responses: Vec<Value> = join_all(
                    batch
                        .into_iter()
                        .map(|item| self.handle_single(item, transport, cancel)),
                )
                .await
                .into_iter()
                .flatten()
                .map(response_value)
                .collect();
                (!responses.is_empty()).then(|| Value::Array(responses))
            }
            single => self
                .handle_single(single, transport, cancel)
                .await
                .map(response_value),
        }
    }

    async fn handle_single(
        &self,
        value: Value,
        transport: &'static str,
        cancel: &CancellationToken,
    ) -> Option<JsonRpcResponse> {
        let request = match parse_request(value) {
            Ok(request) => request,
            Err((id, err)) => return Some(err.into_response(id)),
        };
        let id = request.id.clone();
        let notification = request.is_notification();

        tracing::debug!("{} request: {} (id: {:?})", transport, request.method, id);

        let outcome = self.dispatch(request, transport, cancel).await;
        if notification {
            if let Err(e) = outcome {
                tracing::debug!("Error handling notification on {}: {}", transport, e);
            }
            return None;
        }

        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(e) => {
                tracing::debug!("{} error response: {}", transport, e);
                e.into_response(id)
            }
        })
    }

    async fn dispatch(
        &self,
        request: JsonRpcRequest,
        transport: &'static str,
        cancel: &CancellationToken,
    ) -> Result<Value, RpcError> {
        match request.method.as_str() {
            "initialize" => Ok(self.initialize_result()),
            "notifications/initialized" => Ok(json!({})),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": self.registry.definitions() })),
            "tools/call" => self.call_tool(request.params, transport, cancel).await,
            other => Err(RpcError::MethodNotFound(other.to_string())),
        }
    }

    async fn call_tool(
        &self,
        params: Option<Value>,
        transport: &'static str,
        cancel: &CancellationToken,
    ) -> Result<Value, RpcError> {
        let params: CallToolParams = match params {
            Some(p) => serde_json::from_value(p)
                .map_err(|e| RpcError::InvalidParams(format!("invalid tools/call params: {}", e)))?,
            None => return Err(RpcError::InvalidParams("missing params".to_string())),
        };
        let name = params
            .name
            .filter(|n| !n.is_empty())
            .ok_or_else(|| RpcError::InvalidParams("missing params.name".to_string()))?;

        if !self.registry.contains(&name) {
            return Err(RpcError::ToolNotFound {
                name,
                available: self.registry.names(),
            });
        }

        let args = params.arguments.unwrap_or_else(|| json!({}));
        let result = self.registry.execute(&name, args, transport, cancel).await;
        serde_json::to_value(result).map_err(|e| RpcError::InternalError(e.to_string()))
    }

    fn initialize_result(&self) -> Value {
        json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": { "tools": { "listChanged": false } },
            "serverInfo": { "name": SERVER_NAME, "version": SERVER_VERSION },
        })
    }

    /// Server description returned by the WebSocket `server/info` method.
    pub fn server_info(&self) -> Value {
        json!({
            "name": SERVER_NAME,
            "version": SERVER_VERSION,
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "uptimeSecs": self.started_at.elapsed().as_secs(),
            "tools": self.registry.names(),
            "providers": self.registry.aggregator().provider_status(),
        })
    }
}

/// Validate the envelope shape, keeping the id when one can be recovered.
fn parse_request(value: Value) -> Result<JsonRpcRequest, (Option<Value>, RpcError)> {
    let id = value.get("id").cloned().filter(|id| !id.is_null());
    let Some(obj) = value.as_object() else {
        return Err((None, RpcError::InvalidRequest("request must be an object".to_string())));
    };
    if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err((id, RpcError::InvalidRequest("jsonrpc must be \"2.0\"".to_string())));
    }
    if !obj.get("method").map_or(false, Value::is_string) {
        return Err((id, RpcError::InvalidRequest("method must be a string".to_string())));
    }
    serde_json::from_value(value).map_err(|e| (id, RpcError::InvalidRequest(e.to_string())))
}

pub(crate) fn response_value(response: JsonRpcResponse) -> Value {
    serde_json::to_value(&response).unwrap_or_else(|e| {
        json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": Value::Null,
            "error": { "code": crate::protocol::INTERNAL_ERROR, "message": e.to_string() },
        })
    })
}
