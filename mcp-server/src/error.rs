use serde_json::json;
use thiserror::Error;

use crate::protocol::{self, ErrorObject};

/// Failures inside the Tool Execution Core. Every variant is reported to the
/// caller as an `isError` tool result, never as a transport fault.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Unknown tool '{name}'. Available tools: {}", .available.join(", "))]
    UnknownTool { name: String, available: Vec<String> },

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("No data available for {subject}: {detail}")]
    NoData { subject: String, detail: String },

    #[error("Tool execution failed: {0}")]
    Execution(String),
}

impl From<market_core::ValidationError> for ToolError {
    fn from(err: market_core::ValidationError) -> Self {
        ToolError::InvalidArguments(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Message too large: {size} bytes exceeds {max_bytes}")]
    MessageTooLarge { size: usize, max_bytes: usize },

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Tool not found: {name}")]
    ToolNotFound { name: String, available: Vec<String> },

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Rate limit exceeded: more than {limit} messages in the first {window_secs}s")]
    RateLimited { limit: u32, window_secs: u64 },
}

impl RpcError {
    /// Get the JSON-RPC error code for this error
    pub fn code(&self) -> i32 {
        use crate::protocol::*;
        match self {
            RpcError::ParseError(_) => PARSE_ERROR,
            RpcError::InvalidRequest(_) | RpcError::MessageTooLarge { .. } => INVALID_REQUEST,
            RpcError::MethodNotFound(_) | RpcError::ToolNotFound { .. } => METHOD_NOT_FOUND,
            RpcError::InvalidParams(_) => INVALID_PARAMS,
            RpcError::InternalError(_) => INTERNAL_ERROR,
            RpcError::RateLimited { .. } => RATE_LIMITED,
        }
    }

    /// Get additional error data (optional)
    pub fn data(&self) -> Option<serde_json::Value> {
        match self {
            RpcError::ToolNotFound { available, .. } => Some(json!({
                "availableTools": available,
            })),
            RpcError::MessageTooLarge { size, max_bytes } => Some(json!({
                "reason": "message_too_large",
                "size": size,
                "maxBytes": max_bytes,
            })),
            RpcError::RateLimited { limit, window_secs } => Some(json!({
                "reason": "rate_limited",
                "limit": limit,
                "windowSecs": window_secs,
            })),
            _ => None,
        }
    }

    pub fn to_error_object(&self) -> ErrorObject {
        let message = match self {
            RpcError::ToolNotFound { name, available } => format!(
                "Tool not found: {}. Available tools: {}",
                name,
                available.join(", ")
            ),
            other => other.to_string(),
        };
        ErrorObject {
            code: self.code(),
            message,
            data: self.data(),
        }
    }

    pub fn into_response(self, id: Option<serde_json::Value>) -> protocol::JsonRpcResponse {
        protocol::JsonRpcResponse::failure(id, self.to_error_object())
    }
}

// Convert anyhow errors to RpcError
impl From<anyhow::Error> for RpcError {
    fn from(err: anyhow::Error) -> Self {
        RpcError::InternalError(err.to_string())
    }
}
