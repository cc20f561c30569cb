use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::error::AppError;
use crate::hub::{ConnectionHandle, Payload};
use crate::metrics::{CONNECTIONS_CLOSED, CONNECTIONS_OPENED, CONNECTION_DURATION};
use crate::server::AppState;

/// WebSocket upgrade handler.
///
/// Axum rejects a malformed upgrade before this handler runs; either way a
/// bad handshake is an error response for that request only, and the
/// server keeps accepting others.
#[tracing::instrument(name = "ws.upgrade", skip(ws, state, headers), fields(peer = %addr))]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let origin = headers.get(header::ORIGIN);
    if !state.origin_policy.allows(origin) {
        let shown = origin
            .and_then(|value| value.to_str().ok())
            .unwrap_or("<none>");
        tracing::warn!(origin = %shown, "Rejected upgrade from disallowed origin");
        return AppError::OriginRejected(shown.to_string()).into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state, addr))
}

/// Drive one established WebSocket connection until it fails or closes.
///
/// Registers the connection, then runs a writer task (outbound buffer to
/// socket) and a reader loop (socket to broadcaster) side by side. Either
/// side finishing tears the connection down: deregister, release the
/// socket, terminate. A receive failure is terminal for this connection
/// and never retried; the server itself keeps accepting new clients.
#[tracing::instrument(name = "ws.connection", skip(socket, state), fields(peer = %addr))]
async fn handle_socket(socket: WebSocket, state: AppState, addr: SocketAddr) {
    // The outbound buffer bounds how far a slow client may lag before the
    // fan-out loop disconnects it.
    let (tx, mut rx) = mpsc::channel::<Arc<Payload>>(state.settings.hub.outbound_buffer);

    let handle = Arc::new(ConnectionHandle::new(Some(addr), tx));
    let connection_id = handle.id;
    state.registry.add(handle.clone());
    CONNECTIONS_OPENED.inc();

    tracing::info!(connection_id = %connection_id, "WebSocket connection established");

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Writer: drain the outbound buffer onto the socket until the buffer
    // closes, a write fails, or the hub asks this connection to shut down.
    let writer_handle = handle.clone();
    let mut send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = rx.recv() => {
                    let Some(frame) = frame else { break };
                    if ws_sender.send(to_ws_message(&frame)).await.is_err() {
                        break;
                    }
                }
                _ = writer_handle.closed() => break,
            }
        }
        let _ = ws_sender.close().await;
    });

    // Reader: forward every client frame to the broadcaster.
    let broadcaster = state.broadcaster.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    broadcaster
                        .publish(connection_id, Payload::Text(text.to_string()))
                        .await;
                }
                Ok(Message::Binary(data)) => {
                    broadcaster
                        .publish(connection_id, Payload::Binary(data.to_vec()))
                        .await;
                }
                // Axum answers pings itself; both frames are just liveness.
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Ok(Message::Close(_)) => {
                    tracing::debug!(connection_id = %connection_id, "Received close frame");
                    break;
                }
                Err(e) => {
                    tracing::warn!(connection_id = %connection_id, error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    // Whichever side finishes first ends the connection.
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    // Idempotent: the fan-out loop may already have removed us.
    state.registry.remove(connection_id);

    CONNECTIONS_CLOSED.inc();
    let duration = Utc::now()
        .signed_duration_since(handle.connected_at)
        .num_milliseconds() as f64
        / 1000.0;
    CONNECTION_DURATION.observe(duration);

    tracing::info!(
        connection_id = %connection_id,
        duration_secs = duration,
        "WebSocket connection closed"
    );
}

/// Convert a shared payload into a transport frame for one recipient. Data
/// is copied only here, at the socket boundary; upstream the payload is
/// shared by reference across all recipients.
fn to_ws_message(payload: &Payload) -> Message {
    match payload {
        Payload::Text(text) => Message::Text(text.clone().into()),
        Payload::Binary(data) => Message::Binary(data.clone().into()),
    }
}
