//! JSON-RPC over WebSocket, with `server/info` and lifecycle management.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::dispatcher::{response_value, Dispatcher};
use crate::error::RpcError;
use crate::lifecycle::{ConnectionCommand, ConnectionId, ConnectionManager, MessageAdmission, CLOSE_NORMAL};
use crate::protocol::{JsonRpcResponse, JSONRPC_VERSION};

const TRANSPORT: &str = "websocket";
const COMMAND_CAPACITY: usize = 8;
const OUTBOUND_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct WsState {
    dispatcher: Arc<Dispatcher>,
    manager: Arc<ConnectionManager>,
    shutdown: CancellationToken,
}

impl WsState {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        manager: Arc<ConnectionManager>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            dispatcher,
            manager,
            shutdown,
        }
    }
}

pub fn router(state: WsState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<WsState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "connections": state.manager.connection_count(),
    }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> Response {
    let max = state.manager.config().transport_max_message_bytes;
    ws.max_message_size(max)
        .max_frame_size(max)
        .on_upgrade(move |socket| {
            let tracker = state.manager.tracker().clone();
            tracker.track_future(handle_socket(socket, state))
        })
}

async fn handle_socket(socket: WebSocket, state: WsState) {
    let (mut sink, mut stream) = socket.split();

    if state.shutdown.is_cancelled() {
        let _ = sink.send(close_message(CLOSE_NORMAL, "server shutdown")).await;
        return;
    }

    let (cmd_tx, mut cmd_rx) = mpsc::channel(COMMAND_CAPACITY);
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(OUTBOUND_CAPACITY);
    let id = state.manager.register(cmd_tx);
    let conn_cancel = state.shutdown.child_token();
    tracing::info!("WebSocket connection {} accepted", id);

    let reason = loop {
        tokio::select! {
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    on_message(&state, id, text, &out_tx, &conn_cancel);
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => on_message(&state, id, text, &out_tx, &conn_cancel),
                    Err(e) => {
                        let size = e.as_bytes().len();
                        if size > state.manager.config().max_message_bytes {
                            state.manager.record_message(id, Instant::now());
                            too_large(&out_tx, size, state.manager.config().max_message_bytes);
                        } else {
                            send_error(&out_tx, RpcError::ParseError("binary frame is not UTF-8".to_string()), None);
                        }
                    }
                },
                Some(Ok(Message::Pong(_))) => state.manager.record_pong(id, Instant::now()),
                // Pings are answered by the protocol layer.
                Some(Ok(Message::Ping(_))) => {}
                Some(Ok(Message::Close(_))) | None => break "peer closed",
                Some(Err(e)) => {
                    tracing::debug!("WebSocket {} read error: {}", id, e);
                    break "read error";
                }
            },
            Some(outbound) = out_rx.recv() => {
                if sink.send(outbound).await.is_err() {
                    break "write error";
                }
            }
            Some(command) = cmd_rx.recv() => match command {
                ConnectionCommand::Ping => {
                    if sink.send(Message::Ping(Vec::new())).await.is_err() {
                        break "write error";
                    }
                }
                ConnectionCommand::Close { code, reason } => {
                    let _ = sink.send(close_message(code, reason)).await;
                    await_peer_close(&mut stream, &state, id).await;
                    break reason;
                }
            },
        }
    };

    conn_cancel.cancel();
    state.manager.closed(id, reason);
}

fn close_message(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}

/// Wait up to the grace period for the peer to acknowledge our close frame.
async fn await_peer_close(stream: &mut SplitStream<WebSocket>, state: &WsState, id: ConnectionId) {
    let grace = state.manager.config().close_grace;
    let acknowledged = tokio::time::timeout(grace, async {
        while let Some(Ok(message)) = stream.next().await {
            if matches!(message, Message::Close(_)) {
                return;
            }
        }
    })
    .await;
    if acknowledged.is_err() {
        tracing::warn!("WebSocket {} did not acknowledge close within {:?}; terminating", id, grace);
    }
}

fn on_message(
    state: &WsState,
    id: ConnectionId,
    text: String,
    out_tx: &mpsc::Sender<Message>,
    conn_cancel: &CancellationToken,
) {
    let config = state.manager.config();
    let admission = state.manager.record_message(id, Instant::now());

    if text.len() > config.max_message_bytes {
        tracing::warn!("WebSocket {} sent {} bytes; rejecting", id, text.len());
        too_large(out_tx, text.len(), config.max_message_bytes);
        return;
    }

    if admission == MessageAdmission::RateLimited {
        let request_id = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|v| v.get("id").cloned());
        send_error(
            out_tx,
            RpcError::RateLimited {
                limit: config.soft_limit_messages as u32,
                window_secs: config.soft_limit_window.as_secs(),
            },
            request_id,
        );
        return;
    }

    let state = state.clone();
    let out_tx = out_tx.clone();
    let cancel = conn_cancel.clone();
    tokio::spawn(async move {
        let response = match server_info_request(&text) {
            // A notification gets no reply.
            Some(request_id) => request_id
                .filter(|rid| !rid.is_null())
                .map(|rid| response_value(JsonRpcResponse::success(Some(rid), server_info(&state, id)))),
            None => state.dispatcher.handle_text(&text, TRANSPORT, &cancel).await,
        };
        if let Some(response) = response {
            if cancel.is_cancelled() {
                return;
            }
            let _ = out_tx.send(Message::Text(response.to_string())).await;
        }
    });
}

/// `Some(id)` when `text` is a well-formed `server/info` request.
fn server_info_request(text: &str) -> Option<Option<Value>> {
    let value: Value = serde_json::from_str(text).ok()?;
    let is_info = value.get("jsonrpc").and_then(Value::as_str) == Some(JSONRPC_VERSION)
        && value.get("method").and_then(Value::as_str) == Some("server/info");
    is_info.then(|| value.get("id").cloned())
}

fn server_info(state: &WsState, id: ConnectionId) -> Value {
    let mut info = state.dispatcher.server_info();
    if let Some(obj) = info.as_object_mut() {
        obj.insert(
            "connections".to_string(),
            json!(state.manager.connection_count()),
        );
        obj.insert(
            "session".to_string(),
            json!(state.manager.session_info(id, Instant::now())),
        );
    }
    info
}

fn too_large(out_tx: &mpsc::Sender<Message>, size: usize, max_bytes: usize) {
    send_error(out_tx, RpcError::MessageTooLarge { size, max_bytes }, None);
}

fn send_error(out_tx: &mpsc::Sender<Message>, error: RpcError, id: Option<Value>) {
    let response = response_value(error.into_response(id));
    if out_tx.try_send(Message::Text(response.to_string())).is_err() {
        tracing::warn!("Dropping WebSocket error response: outbound queue full");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_info_detection() {
        assert_eq!(
            server_info_request(r#"{"jsonrpc":"2.0","id":3,"method":"server/info"}"#),
            Some(Some(json!(3)))
        );
        assert_eq!(
            server_info_request(r#"{"jsonrpc":"2.0","method":"server/info"}"#),
            Some(None)
        );
        assert_eq!(
            server_info_request(r#"{"jsonrpc":"2.0","id":3,"method":"ping"}"#),
            None
        );
        assert_eq!(server_info_request("not json"), None);
    }
}
