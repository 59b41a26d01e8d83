//! HTTP REST adapter: `POST /api/<tool>` with a uniform response envelope.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use serde::Serialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::ToolError;
use crate::tools::ToolRegistry;

const TRANSPORT: &str = "rest";

type Throttle = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Clone)]
pub struct RestState {
    registry: Arc<ToolRegistry>,
    throttle: Arc<Throttle>,
    shutdown: CancellationToken,
}

impl RestState {
    pub fn new(registry: Arc<ToolRegistry>, requests_per_second: u32, shutdown: CancellationToken) -> Self {
        let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            registry,
            throttle: Arc::new(RateLimiter::direct(Quota::per_second(rate))),
            shutdown,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EnvelopeError>,
    pub timestamp: String,
    /// Milliseconds spent in the tool.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct EnvelopeError {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl Envelope {
    fn ok(data: Value, started: Instant) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
            processing_time: Some(started.elapsed().as_millis() as u64),
        }
    }

    fn err(code: &'static str, message: impl Into<String>, details: Option<Value>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(EnvelopeError {
                code,
                message: message.into(),
                details,
            }),
            timestamp: chrono::Utc::now().to_rfc3339(),
            processing_time: None,
        }
    }

    fn with_processing_time(mut self, started: Instant) -> Self {
        self.processing_time = Some(started.elapsed().as_millis() as u64);
        self
    }
}

fn reply(status: StatusCode, envelope: Envelope) -> Response {
    (status, Json(envelope)).into_response()
}

fn tool_error_response(err: ToolError, started: Instant) -> Response {
    let (status, code, details) = match &err {
        ToolError::UnknownTool { available, .. } => (
            StatusCode::NOT_FOUND,
            "TOOL_NOT_FOUND",
            Some(json!({ "availableTools": available })),
        ),
        ToolError::InvalidArguments(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", None),
        ToolError::NoData { .. } => (StatusCode::NOT_FOUND, "NO_DATA", None),
        ToolError::Execution(_) => (StatusCode::INTERNAL_SERVER_ERROR, "TOOL_EXECUTION_ERROR", None),
    };
    reply(
        status,
        Envelope::err(code, err.to_string(), details).with_processing_time(started),
    )
}

/// One `POST /api/<name>` route per registered tool, plus listing and health.
pub fn router(state: RestState) -> Router {
    let mut router = Router::new()
        .route("/health", get(super::health))
        .route("/api/tools", get(list_tools))
        .route("/api/:tool", post(unknown_tool));

    for name in state.registry.names() {
        let path = format!("/api/{}", name);
        router = router.route(
            &path,
            post(move |State(state): State<RestState>, body: Bytes| {
                let name = name.clone();
                async move { call_tool(state, name, body).await }
            }),
        );
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn list_tools(State(state): State<RestState>) -> Response {
    let started = Instant::now();
    reply(
        StatusCode::OK,
        Envelope::ok(json!({ "tools": state.registry.definitions() }), started),
    )
}

async fn unknown_tool(State(state): State<RestState>, Path(tool): Path<String>) -> Response {
    tool_error_response(
        ToolError::UnknownTool {
            name: tool,
            available: state.registry.names(),
        },
        Instant::now(),
    )
}

async fn call_tool(state: RestState, name: String, body: Bytes) -> Response {
    let started = Instant::now();

    if state.throttle.check().is_err() {
        tracing::warn!("REST throttle rejected call to {}", name);
        return reply(
            StatusCode::TOO_MANY_REQUESTS,
            Envelope::err("RATE_LIMITED", "Too many requests, retry shortly", None),
        );
    }

    let args = if body.iter().all(u8::is_ascii_whitespace) {
        json!({})
    } else {
        match serde_json::from_slice::<Value>(&body) {
            Ok(value) => value,
            Err(e) => {
                return reply(
                    StatusCode::BAD_REQUEST,
                    Envelope::err("INVALID_JSON", format!("Request body is not valid JSON: {}", e), None),
                )
            }
        }
    };

    if let Err(err) = state.registry.validate_args(&name, &args) {
        return tool_error_response(err, started);
    }

    let cancel = state.shutdown.child_token();
    match state.registry.invoke(&name, args, TRANSPORT, &cancel).await {
        Ok(data) => reply(StatusCode::OK, Envelope::ok(data, started)),
        Err(err) => tool_error_response(err, started),
    }
}
