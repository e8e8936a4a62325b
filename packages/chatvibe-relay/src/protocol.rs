//! WebSocket protocol message definitions.
//!
//! The relay speaks JSON over WebSocket. All payloads are opaque to the
//! relay — encryption happens client-side; the relay only validates
//! structure, persists, and fans out.

use serde::{Deserialize, Serialize};

use chatvibe_core::WirePayload;

// ── Client → Relay ────────────────────────────────────────────────────────────

/// Messages sent from a client to the relay server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Subscribe this connection to a room's broadcasts.
    JoinRoom { room: String },

    /// Persist an encrypted envelope and fan it out to the room.
    SendMessage {
        #[serde(flatten)]
        payload: WirePayload,
    },

    /// Ping to keep the connection alive.
    Ping,
}

// ── Relay → Client ────────────────────────────────────────────────────────────

/// Messages sent from the relay server to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Acknowledgement of a successful room join.
    Joined { room: String },

    /// An envelope broadcast to a room this session subscribed to.
    ReceiveMessage {
        #[serde(flatten)]
        payload: WirePayload,
    },

    /// Pong response to keep the connection alive.
    Pong,

    /// Error response.
    Error { message: String },
}
