//! Server state management.
//!
//! Tracks room subscriptions for connected sessions and carries the shared
//! stores. Room membership lives in a DashMap for lock-free access; the
//! durable stores keep their own synchronization.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::otp::{Notifier, PasscodeStore, DEFAULT_CODE_TTL_SECS};
use crate::protocol::ServerMessage;
use crate::store::SqliteStore;

/// Default OTP sweep interval in seconds.
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub port: u16,
    /// SQLite database path
    pub database: String,
    /// Passcode validity window in seconds
    pub otp_ttl_secs: i64,
    /// How often expired passcodes are swept
    pub sweep_interval_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            database: "chatvibe.db".to_string(),
            otp_ttl_secs: DEFAULT_CODE_TTL_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
        }
    }
}

/// A connected session's sender channel.
pub type ClientSender = mpsc::UnboundedSender<ServerMessage>;

/// Shared server state.
#[derive(Clone)]
pub struct RelayState {
    /// Room id → (session id → sender channel).
    /// A session appears under every room it has joined; it is removed
    /// from all of them on disconnect.
    rooms: Arc<DashMap<String, HashMap<String, ClientSender>>>,

    /// Identity + envelope persistence.
    pub store: Arc<SqliteStore>,

    /// Pending recovery passcodes.
    pub passcodes: Arc<PasscodeStore>,

    /// Outbound passcode delivery channel.
    pub notifier: Arc<dyn Notifier>,

    /// Server configuration.
    pub config: RelayConfig,
}

impl RelayState {
    pub fn new(config: RelayConfig, store: SqliteStore, notifier: Arc<dyn Notifier>) -> Self {
        let passcodes = Arc::new(PasscodeStore::new(config.otp_ttl_secs));
        Self {
            rooms: Arc::new(DashMap::new()),
            store: Arc::new(store),
            passcodes,
            notifier,
            config,
        }
    }

    // ── Room Subscriptions ────────────────────────────────────────────────

    /// Subscribe a session to a room.
    pub fn join_room(&self, room: &str, session_id: &str, sender: ClientSender) {
        tracing::debug!(room = room, session = session_id, "session joined room");
        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(session_id.to_string(), sender);
    }

    /// Remove a session from every room it joined (disconnect cleanup).
    pub fn leave_all(&self, session_id: &str) {
        self.rooms.retain(|_, members| {
            members.remove(session_id);
            !members.is_empty()
        });
    }

    /// Fan a message out to every session subscribed to a room —
    /// at most once per session. Dead senders are pruned as encountered.
    /// Returns the number of sessions reached.
    pub fn broadcast(&self, room: &str, message: &ServerMessage) -> usize {
        let Some(mut members) = self.rooms.get_mut(room) else {
            return 0;
        };

        let mut reached = 0;
        members.retain(|_, sender| match sender.send(message.clone()) {
            Ok(()) => {
                reached += 1;
                true
            }
            Err(_) => false,
        });
        reached
    }

    /// Number of sessions currently subscribed to a room.
    pub fn room_subscriber_count(&self, room: &str) -> usize {
        self.rooms.get(room).map(|m| m.len()).unwrap_or(0)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
