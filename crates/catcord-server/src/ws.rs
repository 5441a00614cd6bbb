//! WebSocket endpoint.
//!
//! Clients of the hosted deployment open this socket out of habit; the
//! stub only logs the connection and drains whatever arrives.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tracing::{debug, info};
use uuid::Uuid;

/// Upgrades `GET /ws` and hands the socket to the connection loop.
pub async fn upgrade(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(handle_socket)
}

async fn handle_socket(mut socket: WebSocket) {
    let connection = Uuid::new_v4().simple().to_string();
    info!(connection = %connection, "WebSocket connected");

    while let Some(frame) = socket.recv().await {
        match frame {
            Ok(Message::Close(_)) => break,
            Ok(message) => {
                debug!(connection = %connection, frame = ?message, "Ignoring inbound frame");
            }
            Err(e) => {
                debug!(connection = %connection, error = %e, "WebSocket read failed");
                break;
            }
        }
    }

    info!(connection = %connection, "WebSocket disconnected");
}
