use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use crate::api::AppState;
use crate::publisher::StreamMessage;

/// Messages a client may send over the report stream
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientCommand {
    Ping,
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send(socket: &mut WebSocket, message: &StreamMessage) -> bool {
    match serde_json::to_string(message) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            debug!("Failed to encode stream message: {}", e);
            true
        }
    }
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let mut rx = state.monitor.publisher().subscribe();
    let heartbeat = Duration::from_secs(state.config.api.heartbeat_secs.max(1));

    if !send(&mut socket, &StreamMessage::connected()).await {
        return;
    }
    debug!("Report stream client connected");

    loop {
        tokio::select! {
            // Forward finished reports
            message = rx.recv() => {
                match message {
                    Ok(m) => {
                        if !send(&mut socket, &m).await {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Report stream client lagging, skipped reports");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            // Client messages
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(ClientCommand::Ping) = serde_json::from_str::<ClientCommand>(text.as_str()) {
                            if !send(&mut socket, &StreamMessage::pong()).await {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
            // Idle keepalive
            _ = tokio::time::sleep(heartbeat) => {
                if !send(&mut socket, &StreamMessage::heartbeat()).await {
                    break;
                }
            }
        }
    }

    debug!("Report stream client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_ping_parses() {
        assert!(matches!(
            serde_json::from_str::<ClientCommand>(r#"{"type":"ping"}"#),
            Ok(ClientCommand::Ping)
        ));
        assert!(serde_json::from_str::<ClientCommand>(r#"{"type":"subscribe"}"#).is_err());
        assert!(serde_json::from_str::<ClientCommand>("ping").is_err());
    }
}
