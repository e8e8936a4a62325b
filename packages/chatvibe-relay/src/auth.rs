//! Account REST API: registration, login, credential recovery, key
//! retrieval, and history replay.
//!
//! Registration is the only place key custody happens server-side: the
//! keypair is generated, the private key is protected under the account
//! password, and only the protected blob is persisted. Any custody
//! failure aborts the whole registration — no identity is created.
//!
//! Key retrieval is keyed by identity id with no caller authorization
//! beyond "identity exists".

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use base64::{engine::general_purpose::STANDARD as B64, Engine};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use chatvibe_core::{custody, crypto::kdf, IdentityKeyPair, MessageEnvelope};

use crate::error::{RelayError, Result};
use crate::state::RelayState;
use crate::store::Identity;

// ── Request / Response Shapes ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyOtpRequest {
    pub email: String,
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePasswordRequest {
    pub email: String,
    pub password: String,
}

/// One history entry: the wire payload plus persistence metadata.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryMessage {
    pub id: String,
    #[serde(flatten)]
    pub payload: chatvibe_core::WirePayload,
    pub delivered: bool,
    pub created_at: i64,
}

impl From<&MessageEnvelope> for HistoryMessage {
    fn from(envelope: &MessageEnvelope) -> Self {
        Self {
            id: envelope.id.clone(),
            payload: envelope.to_wire(),
            delivered: envelope.delivered,
            created_at: envelope.created_at.timestamp_millis(),
        }
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// POST /api/auth/signup
///
/// Registration: verifier hash + keypair + protected private key, stored
/// together. The plaintext private key never leaves this function.
pub async fn signup(
    State(state): State<RelayState>,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse> {
    if state.store.find_by_email(&req.email)?.is_some() {
        return Err(RelayError::EmailTaken);
    }

    let password_verifier = kdf::hash_password_verifier(&req.password)?;

    let keypair = IdentityKeyPair::generate();
    let protected = custody::protect(&keypair.secret_bytes(), &req.password)?;

    let identity = Identity {
        id: Uuid::new_v4().to_string(),
        display_name: req.name,
        email: req.email,
        password_verifier,
        public_key: keypair.public_key().to_base64(),
        protected_private_key: B64.encode(&protected),
    };

    state.store.create_identity(&identity)?;
    tracing::info!(user_id = identity.id.as_str(), "identity registered");

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Signup successful", "userId": identity.id })),
    ))
}

/// POST /api/auth/login
///
/// Unknown email and wrong password fail identically.
pub async fn login(
    State(state): State<RelayState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse> {
    let identity = state
        .store
        .find_by_email(&req.email)?
        .ok_or(RelayError::InvalidCredentials)?;

    if !kdf::verify_password_verifier(&req.password, &identity.password_verifier) {
        return Err(RelayError::InvalidCredentials);
    }

    Ok(Json(json!({
        "message": "Login successful",
        "user": {
            "id": identity.id,
            "name": identity.display_name,
            "email": identity.email,
        }
    })))
}

/// POST /api/auth/check-email — signup probe: taken emails are an error.
pub async fn check_email(
    State(state): State<RelayState>,
    Json(req): Json<EmailRequest>,
) -> Result<impl IntoResponse> {
    if state.store.find_by_email(&req.email)?.is_some() {
        return Err(RelayError::EmailTaken);
    }
    Ok(Json(json!({ "exists": false, "message": "Email is available" })))
}

/// POST /api/auth/check-email-exist — recovery probe: unknown emails are
/// an error.
pub async fn check_email_exist(
    State(state): State<RelayState>,
    Json(req): Json<EmailRequest>,
) -> Result<impl IntoResponse> {
    if state.store.find_by_email(&req.email)?.is_none() {
        return Err(RelayError::EmailNotFound);
    }
    Ok(Json(json!({ "exists": true, "message": "Email exists" })))
}

/// POST /api/auth/send-otp
///
/// Issues a recovery code for a known identity and dispatches it through
/// the notification channel. A failed dispatch revokes the record — a
/// code the user never received must not stay live.
pub async fn send_otp(
    State(state): State<RelayState>,
    Json(req): Json<EmailRequest>,
) -> Result<impl IntoResponse> {
    if state.store.find_by_email(&req.email)?.is_none() {
        return Err(RelayError::EmailNotFound);
    }

    let code = state.passcodes.issue(&req.email);
    if let Err(e) = state.notifier.send(&req.email, &code) {
        tracing::warn!(error = e.as_str(), "passcode dispatch failed");
        state.passcodes.revoke(&req.email);
        return Err(RelayError::NotificationFailed);
    }

    Ok(Json(json!({ "message": "Code sent to email" })))
}

/// POST /api/auth/verify-otp
pub async fn verify_otp(
    State(state): State<RelayState>,
    Json(req): Json<VerifyOtpRequest>,
) -> Result<impl IntoResponse> {
    state.passcodes.verify(&req.email, &req.code)?;
    Ok(Json(json!({ "message": "Code verified successfully" })))
}

/// POST /api/auth/update-password
///
/// Gated on a verified recovery code, which is consumed here so it cannot
/// authorize a second replacement.
///
/// Only the login verifier changes. The protected private key stays
/// encrypted under the password in force at registration — recovery has
/// no way to re-wrap it without that original password, so messages
/// predating a recovery stay readable only via the original password.
pub async fn update_password(
    State(state): State<RelayState>,
    Json(req): Json<UpdatePasswordRequest>,
) -> Result<impl IntoResponse> {
    state.passcodes.consume_verified(&req.email)?;

    let identity = state
        .store
        .find_by_email(&req.email)?
        .ok_or(RelayError::EmailNotFound)?;

    let verifier = kdf::hash_password_verifier(&req.password)?;
    state.store.update_password_verifier(&identity.id, &verifier)?;

    tracing::info!(user_id = identity.id.as_str(), "password verifier replaced");
    Ok(Json(json!({ "message": "Password updated successfully" })))
}

/// GET /api/auth/users — roster without key material or verifiers.
pub async fn get_users(State(state): State<RelayState>) -> Result<impl IntoResponse> {
    let users = state.store.list_identities()?;
    Ok(Json(users))
}

/// GET /api/auth/user/:id/public-key
pub async fn get_public_key(
    State(state): State<RelayState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let identity = state.store.find_by_id(&id)?.ok_or(RelayError::UserNotFound)?;
    Ok(Json(json!({ "publicKey": identity.public_key })))
}

/// GET /api/auth/user/:id/private-key
///
/// Returns the protected blob only — useless without the account password.
pub async fn get_private_key(
    State(state): State<RelayState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let identity = state.store.find_by_id(&id)?.ok_or(RelayError::UserNotFound)?;
    Ok(Json(
        json!({ "protectedPrivateKey": identity.protected_private_key }),
    ))
}

/// GET /api/auth/get-chat-data/:room — history replay in persistence order.
pub async fn get_chat_data(
    State(state): State<RelayState>,
    Path(room): Path<String>,
) -> Result<impl IntoResponse> {
    let envelopes = state.store.list_by_room(&room)?;
    let messages: Vec<HistoryMessage> = envelopes.iter().map(HistoryMessage::from).collect();
    Ok(Json(messages))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otp::LogNotifier;
    use crate::state::RelayConfig;
    use crate::store::SqliteStore;
    use base64::{engine::general_purpose::STANDARD as B64, Engine};
    use std::sync::Arc;

    fn test_state() -> RelayState {
        RelayState::new(
            RelayConfig::default(),
            SqliteStore::open_in_memory().unwrap(),
            Arc::new(LogNotifier),
        )
    }

    async fn register(state: &RelayState, name: &str, email: &str, password: &str) -> String {
        signup(
            State(state.clone()),
            Json(SignupRequest {
                name: name.into(),
                email: email.into(),
                password: password.into(),
            }),
        )
        .await
        .unwrap();
        state.store.find_by_email(email).unwrap().unwrap().id
    }

    #[tokio::test]
    async fn test_signup_creates_custodied_identity() {
        let state = test_state();
        let id = register(&state, "Alice", "alice@example.com", "hunter2").await;

        let identity = state.store.find_by_id(&id).unwrap().unwrap();

        // The stored blob opens only with the account password
        let blob = B64.decode(&identity.protected_private_key).unwrap();
        let secret = custody::unprotect(&blob, "hunter2").unwrap();
        let keypair = IdentityKeyPair::from_bytes(&secret);
        assert_eq!(keypair.public_key().to_base64(), identity.public_key);

        assert!(custody::unprotect(&blob, "wrong").is_err());
    }

    #[tokio::test]
    async fn test_signup_duplicate_email() {
        let state = test_state();
        register(&state, "Alice", "alice@example.com", "hunter2").await;

        let result = signup(
            State(state.clone()),
            Json(SignupRequest {
                name: "Mallory".into(),
                email: "alice@example.com".into(),
                password: "other".into(),
            }),
        )
        .await;

        assert!(matches!(result, Err(RelayError::EmailTaken)));
    }

    #[tokio::test]
    async fn test_login_paths() {
        let state = test_state();
        register(&state, "Alice", "alice@example.com", "hunter2").await;

        assert!(login(
            State(state.clone()),
            Json(LoginRequest {
                email: "alice@example.com".into(),
                password: "hunter2".into(),
            }),
        )
        .await
        .is_ok());

        // Wrong password and unknown email fail identically
        assert!(matches!(
            login(
                State(state.clone()),
                Json(LoginRequest {
                    email: "alice@example.com".into(),
                    password: "wrong".into(),
                }),
            )
            .await,
            Err(RelayError::InvalidCredentials)
        ));
        assert!(matches!(
            login(
                State(state.clone()),
                Json(LoginRequest {
                    email: "ghost@example.com".into(),
                    password: "hunter2".into(),
                }),
            )
            .await,
            Err(RelayError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_send_otp_requires_known_identity() {
        let state = test_state();
        let result = send_otp(
            State(state.clone()),
            Json(EmailRequest {
                email: "ghost@example.com".into(),
            }),
        )
        .await;

        assert!(matches!(result, Err(RelayError::EmailNotFound)));
        assert_eq!(state.passcodes.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_dispatch_revokes_code() {
        struct FailingNotifier;
        impl crate::otp::Notifier for FailingNotifier {
            fn send(&self, _: &str, _: &str) -> std::result::Result<(), String> {
                Err("smtp down".into())
            }
        }

        let state = RelayState::new(
            RelayConfig::default(),
            SqliteStore::open_in_memory().unwrap(),
            Arc::new(FailingNotifier),
        );
        register(&state, "Alice", "alice@example.com", "hunter2").await;

        let result = send_otp(
            State(state.clone()),
            Json(EmailRequest {
                email: "alice@example.com".into(),
            }),
        )
        .await;

        assert!(matches!(result, Err(RelayError::NotificationFailed)));
        assert_eq!(state.passcodes.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_recovery_flow_replaces_verifier_only() {
        struct CapturingNotifier(parking_lot::Mutex<String>);
        impl crate::otp::Notifier for CapturingNotifier {
            fn send(&self, _: &str, code: &str) -> std::result::Result<(), String> {
                *self.0.lock() = code.to_string();
                Ok(())
            }
        }

        let notifier = Arc::new(CapturingNotifier(parking_lot::Mutex::new(String::new())));
        let state = RelayState::new(
            RelayConfig::default(),
            SqliteStore::open_in_memory().unwrap(),
            notifier.clone(),
        );
        let id = register(&state, "Alice", "alice@example.com", "hunter2").await;
        let before = state.store.find_by_id(&id).unwrap().unwrap();

        send_otp(
            State(state.clone()),
            Json(EmailRequest {
                email: "alice@example.com".into(),
            }),
        )
        .await
        .unwrap();
        let code = notifier.0.lock().clone();

        verify_otp(
            State(state.clone()),
            Json(VerifyOtpRequest {
                email: "alice@example.com".into(),
                code,
            }),
        )
        .await
        .unwrap();

        update_password(
            State(state.clone()),
            Json(UpdatePasswordRequest {
                email: "alice@example.com".into(),
                password: "new-password".into(),
            }),
        )
        .await
        .unwrap();

        let after = state.store.find_by_id(&id).unwrap().unwrap();

        // Login moves to the new password
        assert!(kdf::verify_password_verifier(
            "new-password",
            &after.password_verifier
        ));
        assert!(!kdf::verify_password_verifier(
            "hunter2",
            &after.password_verifier
        ));

        // Custody is untouched: still bound to the original password
        assert_eq!(after.protected_private_key, before.protected_private_key);
        let blob = B64.decode(&after.protected_private_key).unwrap();
        assert!(custody::unprotect(&blob, "hunter2").is_ok());
        assert!(custody::unprotect(&blob, "new-password").is_err());

        // The consumed code cannot gate a second replacement
        assert!(matches!(
            update_password(
                State(state.clone()),
                Json(UpdatePasswordRequest {
                    email: "alice@example.com".into(),
                    password: "another".into(),
                }),
            )
            .await,
            Err(RelayError::NoPendingCode)
        ));
    }

    #[tokio::test]
    async fn test_update_password_requires_verified_code() {
        let state = test_state();
        register(&state, "Alice", "alice@example.com", "hunter2").await;

        // No code requested at all
        assert!(matches!(
            update_password(
                State(state.clone()),
                Json(UpdatePasswordRequest {
                    email: "alice@example.com".into(),
                    password: "new".into(),
                }),
            )
            .await,
            Err(RelayError::NoPendingCode)
        ));

        // Code issued but never verified
        state.passcodes.issue("alice@example.com");
        assert!(matches!(
            update_password(
                State(state.clone()),
                Json(UpdatePasswordRequest {
                    email: "alice@example.com".into(),
                    password: "new".into(),
                }),
            )
            .await,
            Err(RelayError::NotVerified)
        ));
    }

    #[tokio::test]
    async fn test_key_retrieval_endpoints() {
        let state = test_state();
        let id = register(&state, "Alice", "alice@example.com", "hunter2").await;

        assert!(get_public_key(State(state.clone()), Path(id.clone()))
            .await
            .is_ok());
        assert!(get_private_key(State(state.clone()), Path(id)).await.is_ok());

        assert!(matches!(
            get_public_key(State(state.clone()), Path("missing".into())).await,
            Err(RelayError::UserNotFound)
        ));
    }
}
