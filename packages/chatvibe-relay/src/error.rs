//! Relay-side error type and HTTP mapping.
//!
//! Everything user-correctable maps to a 4xx with a JSON message the way
//! the clients expect; storage and crypto internals collapse to a 500
//! without leaking detail.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("email is already registered")]
    EmailTaken,

    #[error("email is not registered")]
    EmailNotFound,

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("invalid code")]
    InvalidCode,

    #[error("code expired")]
    CodeExpired,

    #[error("no pending code for this email")]
    NoPendingCode,

    #[error("code has not been verified")]
    NotVerified,

    #[error("failed to dispatch passcode")]
    NotificationFailed,

    #[error("user not found")]
    UserNotFound,

    #[error(transparent)]
    Core(#[from] chatvibe_core::Error),

    #[error("storage error: {0}")]
    Storage(String),
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        use chatvibe_core::Error as CoreError;

        let status = match &self {
            RelayError::EmailTaken
            | RelayError::EmailNotFound
            | RelayError::InvalidCredentials
            | RelayError::InvalidCode
            | RelayError::CodeExpired
            | RelayError::NoPendingCode => StatusCode::BAD_REQUEST,
            RelayError::NotVerified => StatusCode::FORBIDDEN,
            RelayError::UserNotFound => StatusCode::NOT_FOUND,
            RelayError::Core(CoreError::Validation(_))
            | RelayError::Core(CoreError::InvalidIdentifier(_)) => StatusCode::BAD_REQUEST,
            RelayError::NotificationFailed
            | RelayError::Core(_)
            | RelayError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Internal detail stays in the logs, not the response body.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
            "internal server error".to_string()
        } else {
            self.to_string()
        };

        (status, Json(json!({ "message": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_errors_are_4xx() {
        for err in [
            RelayError::EmailTaken,
            RelayError::EmailNotFound,
            RelayError::InvalidCredentials,
            RelayError::InvalidCode,
            RelayError::CodeExpired,
            RelayError::NoPendingCode,
        ] {
            let status = err.into_response().status();
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn test_internal_errors_are_500() {
        let status = RelayError::Storage("disk on fire".into())
            .into_response()
            .status();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
