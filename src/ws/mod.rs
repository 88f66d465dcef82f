use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::Arc;

use crate::error::GameError;
use crate::protocol::{ClientMessage, ServerMessage, PROTOCOL_VERSION};
use crate::state::{normalize_code, AppState};

/// WebSocket upgrade handler for a room's live channel
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(code): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let code = normalize_code(&code);
    tracing::info!(room = %code, "WebSocket connection request");

    ws.on_upgrade(move |socket| handle_socket(socket, code, state))
}

/// What a client gets on connect and on `sync`
async fn welcome(state: &AppState, code: &str) -> ServerMessage {
    match state.room_view(code).await {
        Ok(room) => ServerMessage::Welcome {
            protocol: PROTOCOL_VERSION.to_string(),
            room,
            server_now: chrono::Utc::now().to_rfc3339(),
        },
        Err(e) => error_message(&e),
    }
}

fn error_message(e: &GameError) -> ServerMessage {
    ServerMessage::Error {
        code: e.code().to_string(),
        msg: e.to_string(),
    }
}

fn encode(msg: &ServerMessage) -> Option<Message> {
    match serde_json::to_string(msg) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            tracing::error!("Failed to serialize message: {}", e);
            None
        }
    }
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, code: String, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before the welcome so nothing committed in between is missed
    let (subscriber_id, mut updates) = state.fanout.subscribe(&code).await;
    tracing::info!(room = %code, subscriber = %subscriber_id, "WebSocket connected");

    if let Some(msg) = encode(&welcome(&state, &code).await) {
        if sender.send(msg).await.is_err() {
            tracing::error!("Failed to send welcome message");
            state.fanout.unsubscribe(&code, &subscriber_id).await;
            return;
        }
    }

    loop {
        tokio::select! {
            // Room updates, already serialized by the fan-out
            update = updates.recv() => {
                match update {
                    Some(payload) => {
                        if sender.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            // Handle client messages
            ws_msg = receiver.next() => {
                match ws_msg {
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!(room = %code, "Received message: {}", text);

                        if let Some(reply) = handle_text(&state, &code, text.as_str()).await {
                            if let Some(msg) = encode(&reply) {
                                if sender.send(msg).await.is_err() {
                                    tracing::error!("Failed to send response");
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!("WebSocket closed");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    state.fanout.unsubscribe(&code, &subscriber_id).await;
    tracing::info!(room = %code, subscriber = %subscriber_id, "WebSocket connection closed");
}

/// Handle one text frame. Returns a reply meant only for this client.
///
/// Plain text that is not a protocol message is table talk and gets relayed as chat.
async fn handle_text(state: &AppState, code: &str, raw: &str) -> Option<ServerMessage> {
    let client_msg = match serde_json::from_str::<ClientMessage>(raw) {
        Ok(msg) => msg,
        Err(e) if raw.trim_start().starts_with('{') => {
            tracing::warn!("Failed to parse client message: {}", e);
            return Some(ServerMessage::Error {
                code: "PARSE_ERROR".to_string(),
                msg: format!("Invalid message format: {}", e),
            });
        }
        Err(_) => ClientMessage::Chat {
            sender: None,
            text: raw.to_string(),
        },
    };

    match client_msg {
        ClientMessage::Chat { sender, text } => {
            let delivered = state
                .fanout
                .broadcast(code, &ServerMessage::Chat {
                    sender,
                    message: text,
                })
                .await;
            tracing::debug!(room = %code, delivered, "Chat relayed");
            None
        }
        ClientMessage::Sync => Some(welcome(state, code).await),
    }
}
