//! WebSocket connection handler.
//!
//! Manages individual WebSocket connections: parsing client messages,
//! routing them through the relay state, and sending responses.
//!
//! Delivery contract: real-time fan-out is at-most-once per connected
//! session per envelope. A session that is not subscribed to a room at
//! broadcast time relies entirely on history replay on its next load.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::RelayState;

/// Handle a single WebSocket connection for its lifetime:
/// 1. Assigns a session id and spawns a sender task for outbound messages
/// 2. Processes incoming messages until the connection closes
/// 3. Unsubscribes the session from all rooms on disconnect
pub async fn handle_websocket(socket: WebSocket, state: RelayState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let session_id = Uuid::new_v4().to_string();

    // Outbound channel for this session
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    tracing::info!(session = session_id.as_str(), "WebSocket connected");

    // ── Sender Task ───────────────────────────────────────────────────────

    let sender_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json)).await.is_err() {
                        break; // Connection closed
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize server message: {}", e);
                }
            }
        }
    });

    // ── Receive Loop ──────────────────────────────────────────────────────

    while let Some(msg_result) = ws_receiver.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(client_msg) => {
                    handle_client_message(&state, &session_id, &tx, client_msg);
                }
                Err(e) => {
                    tracing::warn!(
                        session = session_id.as_str(),
                        error = %e,
                        "Failed to parse client message"
                    );
                    let _ = tx.send(ServerMessage::Error {
                        message: format!("Invalid message format: {}", e),
                    });
                }
            },
            Ok(Message::Ping(_)) => {
                let _ = tx.send(ServerMessage::Pong);
            }
            Ok(Message::Close(_)) => {
                tracing::info!(session = session_id.as_str(), "Client sent close frame");
                break;
            }
            Err(e) => {
                tracing::warn!(
                    session = session_id.as_str(),
                    error = %e,
                    "WebSocket error"
                );
                break;
            }
            _ => {} // Binary, Pong — ignore
        }
    }

    // ── Cleanup ───────────────────────────────────────────────────────────

    state.leave_all(&session_id);
    sender_task.abort();
    tracing::info!(session = session_id.as_str(), "WebSocket disconnected");
}

/// Handle a parsed client message.
fn handle_client_message(
    state: &RelayState,
    session_id: &str,
    tx: &mpsc::UnboundedSender<ServerMessage>,
    msg: ClientMessage,
) {
    match msg {
        ClientMessage::JoinRoom { room } => {
            state.join_room(&room, session_id, tx.clone());
            let _ = tx.send(ServerMessage::Joined { room });
        }

        ClientMessage::SendMessage { payload } => {
            // Validate before anything touches disk — a malformed envelope
            // is rejected whole, never partially written.
            let envelope = match payload.to_envelope() {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::warn!(
                        session = session_id,
                        error = %e,
                        "rejected malformed envelope"
                    );
                    let _ = tx.send(ServerMessage::Error {
                        message: e.to_string(),
                    });
                    return;
                }
            };

            // Persist, then broadcast — in that order, so history replay
            // can never miss a message a live session saw.
            if let Err(e) = state.store.append_envelope(&envelope) {
                tracing::error!(session = session_id, error = %e, "failed to persist envelope");
                let _ = tx.send(ServerMessage::Error {
                    message: "failed to persist message".to_string(),
                });
                return;
            }

            let reached = state.broadcast(
                &envelope.room,
                &ServerMessage::ReceiveMessage {
                    payload: envelope.to_wire(),
                },
            );
            tracing::debug!(
                room = envelope.room.as_str(),
                sender = envelope.sender_id.as_str(),
                reached = reached,
                "envelope persisted and broadcast"
            );
        }

        ClientMessage::Ping => {
            let _ = tx.send(ServerMessage::Pong);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
