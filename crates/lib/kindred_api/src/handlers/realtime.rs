//! WebSocket endpoint. Admission happens in
//! [`crate::middleware::realtime::require_handshake`].

use axum::Extension;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use kindred_core::models::auth::Identity;
use serde::Serialize;
use tracing::debug;

use crate::middleware::auth::AuthenticatedUser;

/// Frames sent by the server.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame<'a> {
    /// First frame on every admitted connection.
    Ready { identity: &'a Identity },
    Pong,
}

impl ServerFrame<'_> {
    fn message(&self) -> Option<Message> {
        serde_json::to_string(self)
            .ok()
            .map(|text| Message::Text(text.into()))
    }
}

/// `GET /ws`
pub async fn ws_handler(
    Extension(user): Extension<AuthenticatedUser>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| serve_connection(socket, user.0))
}

async fn serve_connection(mut socket: WebSocket, identity: Identity) {
    let Some(ready) = (ServerFrame::Ready {
        identity: &identity,
    })
    .message() else {
        return;
    };
    if socket.send(ready).await.is_err() {
        return;
    }

    while let Some(Ok(msg)) = socket.recv().await {
        match msg {
            Message::Text(text) if text.as_str().trim() == "ping" => {
                let Some(pong) = ServerFrame::Pong.message() else {
                    break;
                };
                if socket.send(pong).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    debug!(session_id = %identity.session_id, "realtime connection closed");
}
