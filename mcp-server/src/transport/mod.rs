//! Wire front ends. Each one translates its protocol onto the tool registry
//! or the JSON-RPC dispatcher and holds no other state.

pub mod rest;
pub mod rpc_http;
pub mod stdio;
pub mod websocket;

use axum::Json;
use serde_json::{json, Value};

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
