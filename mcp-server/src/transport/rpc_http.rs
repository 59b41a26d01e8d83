//! JSON-RPC over HTTP: one POST endpoint in front of the dispatcher.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::dispatcher::{response_value, Dispatcher};
use crate::error::RpcError;

#[derive(Clone)]
pub struct RpcState {
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
}

impl RpcState {
    pub fn new(dispatcher: Arc<Dispatcher>, shutdown: CancellationToken) -> Self {
        Self {
            dispatcher,
            shutdown,
        }
    }
}

pub fn router(state: RpcState) -> Router {
    Router::new()
        .route("/", post(handle_rpc))
        .route("/rpc", post(handle_rpc))
        .route("/health", get(super::health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn handle_rpc(State(state): State<RpcState>, body: Bytes) -> Response {
    let body = match std::str::from_utf8(&body) {
        Ok(body) => body,
        Err(e) => {
            tracing::debug!("Rejecting non-UTF-8 JSON-RPC body: {}", e);
            let error = RpcError::ParseError(format!("Body is not valid UTF-8: {}", e));
            return Json(response_value(error.into_response(None))).into_response();
        }
    };

    let cancel = state.shutdown.child_token();
    match state.dispatcher.handle_text(body, "http-rpc", &cancel).await {
        Some(response) => Json(response).into_response(),
        // Notifications get an empty acknowledgment.
        None => StatusCode::NO_CONTENT.into_response(),
    }
}
