//! ChatVibe Relay Server
//!
//! Persists and forwards end-to-end encrypted messages between clients
//! over named rooms:
//!
//! 1. **Account API**: registration (with server-side key custody under the
//!    account password), login, and one-time-passcode credential recovery.
//!
//! 2. **Room fan-out**: clients join a room over WebSocket; a sent envelope
//!    is persisted first, then broadcast to every subscribed session.
//!
//! 3. **History replay**: a room's envelopes are served back in exact
//!    persistence order for clients to decrypt locally.
//!
//! **Privacy**: the relay never sees plaintext content or usable private
//! keys. All decryption material it stores is protected under passwords it
//! never learns; message payloads are opaque encrypted blobs.

mod auth;
mod error;
mod handler;
mod otp;
mod protocol;
mod state;
mod store;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{State, WebSocketUpgrade},
    http::Method,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use otp::LogNotifier;
use state::{RelayConfig, RelayState};
use store::SqliteStore;

// ── CLI Arguments ─────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "chatvibe-relay", version, about = "ChatVibe encrypted-messaging relay server")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 3000, env = "RELAY_PORT")]
    port: u16,

    /// SQLite database path
    #[arg(long, default_value = "chatvibe.db", env = "RELAY_DATABASE")]
    database: String,

    /// One-time passcode TTL in seconds
    #[arg(long, default_value_t = 300, env = "OTP_TTL_SECS")]
    otp_ttl_secs: i64,

    /// Expired-passcode sweep interval in seconds
    #[arg(long, default_value_t = 60, env = "OTP_SWEEP_INTERVAL_SECS")]
    sweep_interval_secs: u64,
}

// ── Entry Point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatvibe_relay=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();

    let config = RelayConfig {
        port: args.port,
        database: args.database,
        otp_ttl_secs: args.otp_ttl_secs,
        sweep_interval_secs: args.sweep_interval_secs,
    };

    let store = SqliteStore::open(&config.database).expect("Failed to open database");
    let state = RelayState::new(config, store, Arc::new(LogNotifier));

    // Spawn periodic passcode sweep
    let sweep_state = state.clone();
    let sweep_interval = state.config.sweep_interval_secs;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(sweep_interval));
        loop {
            interval.tick().await;
            let dropped = sweep_state.passcodes.sweep_expired();
            if dropped > 0 {
                tracing::debug!(dropped = dropped, "swept expired passcodes");
            }
        }
    });

    // Build router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    let auth_routes = Router::new()
        .route("/signup", post(auth::signup))
        .route("/login", post(auth::login))
        .route("/check-email", post(auth::check_email))
        .route("/check-email-exist", post(auth::check_email_exist))
        .route("/send-otp", post(auth::send_otp))
        .route("/verify-otp", post(auth::verify_otp))
        .route("/update-password", post(auth::update_password))
        .route("/users", get(auth::get_users))
        .route("/user/:id/public-key", get(auth::get_public_key))
        .route("/user/:id/private-key", get(auth::get_private_key))
        .route("/get-chat-data/:room", get(auth::get_chat_data));

    let app = Router::new()
        .nest("/api/auth", auth_routes)
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let addr = format!("0.0.0.0:{}", state.config.port);
    tracing::info!("ChatVibe relay server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app)
        .await
        .expect("Server error");
}

// ── Route Handlers ────────────────────────────────────────────────────────────

/// WebSocket upgrade handler for client connections.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<RelayState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handler::handle_websocket(socket, state))
}

/// Health check endpoint.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "chatvibe-relay",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_json_structure() {
        let json_val = json!({
            "status": "ok",
            "service": "chatvibe-relay",
            "version": env!("CARGO_PKG_VERSION"),
        });
        assert_eq!(json_val["status"], "ok");
        assert_eq!(json_val["service"], "chatvibe-relay");
    }

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.otp_ttl_secs, 300);
        assert_eq!(config.sweep_interval_secs, 60);
    }

    #[tokio::test]
    async fn test_state_creation() {
        let state = RelayState::new(
            RelayConfig::default(),
            SqliteStore::open_in_memory().unwrap(),
            Arc::new(LogNotifier),
        );
        assert_eq!(state.room_subscriber_count("a_b"), 0);
        assert_eq!(state.passcodes.pending_count(), 0);
    }
}
