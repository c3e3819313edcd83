use crate::server::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tradedesk_core::TradeEvent;

/// Streams every trade event to the client as a JSON text frame.
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let events = state.events.subscribe();
    ws.on_upgrade(|socket| websocket_connection(socket, events))
}

async fn websocket_connection(mut socket: WebSocket, mut events: broadcast::Receiver<TradeEvent>) {
    loop {
        tokio::select! {
            event = events.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("WebSocket client lagged, {} trade events dropped", skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(frame) = event_frame(&event) else {
                    continue;
                };
                if socket.send(frame).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }

    tracing::info!("WebSocket connection closed");
}

/// JSON text frame for an event, or `None` when it cannot be serialized.
fn event_frame<T: Serialize>(event: &T) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(json)),
        Err(e) => {
            tracing::warn!("Failed to serialize trade event for WebSocket: {}", e);
            None
        }
    }
}
