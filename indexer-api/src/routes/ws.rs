//! WebSocket route
//!
//! Thin transport layer: frames in go to the hub, frames out drain from
//! the connection's mailbox. The hub owns all subscription state.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, error, info};

use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/ws", get(ws_handler))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    info!("WebSocket upgrade request received");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (conn_id, outbox) = state.hub.connect();
    let (mut sender, mut receiver) = socket.split();

    // Writer: drain the mailbox until the hub closes it, then say
    // goodbye with a normal close frame
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbox.recv().await {
            let json = match serde_json::to_string(&frame) {
                Ok(json) => json,
                Err(e) => {
                    error!("failed to serialize frame: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    // Reader: feed client frames to the hub
    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Text(text)) => state.hub.handle_frame(conn_id, &text),
            Ok(Message::Close(_)) => {
                debug!("{} sent close", conn_id);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                debug!("{} socket error: {}", conn_id, e);
                break;
            }
        }
    }

    state.hub.disconnect(conn_id);
    let _ = writer.await;
}
