//! WebSocket transport gateway.
//!
//! - `/ws` - WebSocket endpoint carrying the relay protocol
//! - `/api/relay/stats` - Relay statistics
//!
//! ## WebSocket Protocol
//!
//! ```json
//! // Join a room
//! {"type": "join_channel", "roomId": "general"}
//!
//! // Send a message to a joined room
//! {"type": "send_message", "roomId": "general", "content": "hi",
//!  "senderId": "u1", "senderDisplayName": "Ada", "id": "temp-1"}
//!
//! // Leave a room
//! {"type": "leave_channel", "roomId": "general"}
//!
//! // Ping for keepalive
//! {"type": "ping"}
//! ```
//!
//! ## Identity
//!
//! A connection is authenticated only through `authorization.user_header`,
//! which a fronting proxy sets after verifying the user. Query parameters
//! never carry identity. Without the header the connection is anonymous.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{HeaderMap, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::{stream::SplitStream, SinkExt, StreamExt};
use huddle_relay::{ClientEvent, ConnectionId, RelayEngine, RelayError, ServerEvent};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::api::AppState;
use crate::observability::{Direction, MetricsState};

/// Create the gateway routes.
pub fn gateway_routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/relay/stats", get(get_stats))
}

/// Authenticated user id from the trusted header, if one is configured.
fn user_from_headers(headers: &HeaderMap, user_header: Option<&HeaderName>) -> Option<String> {
    let value = headers.get(user_header?)?.to_str().ok()?.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    // Fast path only; the slot is reserved after the upgrade.
    if state.engine.at_capacity() {
        warn!(
            max_connections = state.engine.config().max_connections,
            "Connection refused at capacity"
        );
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": "relay at capacity" })),
        )
            .into_response();
    }

    let user_id = user_from_headers(&headers, state.user_header.as_ref());
    ws.max_message_size(state.max_message_bytes)
        .on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

/// Disconnects the connection from the relay when the socket task ends,
/// however it ends.
struct Session {
    engine: Arc<RelayEngine>,
    metrics: MetricsState,
    connection_id: ConnectionId,
}

impl Session {
    fn open(engine: Arc<RelayEngine>, metrics: MetricsState, connection_id: ConnectionId) -> Self {
        metrics.websocket_connections.inc();
        Self {
            engine,
            metrics,
            connection_id,
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.engine.handle_disconnect(&self.connection_id);
        self.metrics.websocket_connections.dec();
        info!(connection_id = %self.connection_id, "WebSocket client disconnected");
    }
}

/// Handle a WebSocket connection.
async fn handle_socket(mut socket: WebSocket, state: AppState, user_id: Option<String>) {
    let engine = Arc::clone(&state.engine);
    let (connection, mut outbound) = match engine.try_connect(user_id) {
        Ok(registered) => registered,
        Err(e) => {
            refuse(&mut socket, &state.metrics, &e).await;
            return;
        }
    };
    let connection_id = connection.id.clone();
    drop(connection);

    let _session = Session::open(
        Arc::clone(&engine),
        state.metrics.clone(),
        connection_id.clone(),
    );
    info!(connection_id = %connection_id, "WebSocket client connected");

    let (mut ws_sender, ws_receiver) = socket.split();

    // Forward queued events to the socket
    let metrics = state.metrics.clone();
    let send_id = connection_id.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let text = match event.encode() {
                Ok(text) => text,
                Err(e) => {
                    warn!(connection_id = %send_id, error = %e, "Failed to encode event");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
            metrics.record_frame(Direction::Outbound);
        }
        debug!(connection_id = %send_id, "Send task ended");
    });

    tokio::select! {
        _ = read_frames(&engine, &state.metrics, &connection_id, ws_receiver) => {}
        _ = &mut send_task => {
            debug!(connection_id = %connection_id, "Socket writer closed");
        }
    }

    send_task.abort();
}

/// Tell the client why it was refused, then close.
async fn refuse(socket: &mut WebSocket, metrics: &MetricsState, err: &RelayError) {
    warn!(error = %err, "Connection refused after upgrade");
    metrics.record_rejection(err.code());
    if let Ok(text) = ServerEvent::error(err).encode() {
        let _ = socket.send(Message::Text(text.into())).await;
    }
    let _ = socket.send(Message::Close(None)).await;
}

/// Read client frames until the socket closes or fails.
async fn read_frames(
    engine: &RelayEngine,
    metrics: &MetricsState,
    connection_id: &str,
    mut ws_receiver: SplitStream<WebSocket>,
) {
    while let Some(frame) = ws_receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                metrics.record_frame(Direction::Inbound);
                let reply = match ClientEvent::decode(text.as_str()) {
                    Ok(event) => engine.handle_event(connection_id, event),
                    Err(e) => Some(engine.rejection(connection_id, &e)),
                };
                if let Some(reply) = reply {
                    send_reply(engine, metrics, connection_id, reply);
                }
            }
            Ok(Message::Binary(_)) => {
                metrics.record_frame(Direction::Inbound);
                let err = RelayError::MalformedEvent("binary frames are not supported".to_string());
                let reply = engine.rejection(connection_id, &err);
                send_reply(engine, metrics, connection_id, reply);
            }
            Ok(Message::Close(_)) => {
                debug!(connection_id = %connection_id, "WebSocket close received");
                break;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Err(e) => {
                let err = RelayError::TransportFailure(e.to_string());
                warn!(connection_id = %connection_id, error = %err, "WebSocket error");
                break;
            }
        }
    }
}

fn send_reply(engine: &RelayEngine, metrics: &MetricsState, connection_id: &str, reply: ServerEvent) {
    if let ServerEvent::Error { code, .. } = &reply {
        metrics.record_rejection(code);
    }
    engine.enqueue(connection_id, reply);
}

/// Get relay statistics.
async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.stats())
}
