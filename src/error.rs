use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::users::repo::DuplicateEmail;

/// Failures of the credential subsystem and the account API around it.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Unknown email and wrong password are deliberately indistinguishable.
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("user not found")]
    UserNotFound,

    /// Covers both a missing and an expired reset token.
    #[error("invalid or expired token")]
    InvalidOrExpiredToken,

    #[error("password hashing failed: {0}")]
    Hashing(String),

    #[error("token signing failed: {0}")]
    Signing(String),

    #[error("invalid session token: {0}")]
    InvalidToken(String),

    #[error("storage error: {0:#}")]
    Storage(#[source] anyhow::Error),

    #[error("{0}")]
    Validation(String),

    #[error("email already registered")]
    EmailTaken,

    #[error("access denied")]
    Forbidden,

    #[error("notification delivery failed: {0:#}")]
    Notification(#[source] anyhow::Error),
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InvalidCredentials | AuthError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            AuthError::UserNotFound => StatusCode::NOT_FOUND,
            AuthError::InvalidOrExpiredToken | AuthError::Validation(_) => StatusCode::BAD_REQUEST,
            AuthError::EmailTaken => StatusCode::CONFLICT,
            AuthError::Forbidden => StatusCode::FORBIDDEN,
            AuthError::Hashing(_)
            | AuthError::Signing(_)
            | AuthError::Storage(_)
            | AuthError::Notification(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand to a client. Internal details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::InvalidCredentials => "Invalid credentials".into(),
            AuthError::UserNotFound => "User not found".into(),
            AuthError::InvalidOrExpiredToken => "Invalid or expired token".into(),
            AuthError::InvalidToken(_) => "Invalid or expired token".into(),
            AuthError::Validation(msg) => msg.clone(),
            AuthError::EmailTaken => "Email already registered".into(),
            AuthError::Forbidden => "Access denied".into(),
            AuthError::Notification(_) => "Failed to send email".into(),
            AuthError::Hashing(_) | AuthError::Signing(_) | AuthError::Storage(_) => {
                "Internal server error".into()
            }
        }
    }

    /// Wraps a repository failure, surfacing email collisions as `EmailTaken`.
    pub fn storage(err: anyhow::Error) -> Self {
        if err.downcast_ref::<DuplicateEmail>().is_some() {
            AuthError::EmailTaken
        } else {
            AuthError::Storage(err)
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        AuthError::Validation(msg.into())
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, %status, "request rejected");
        }
        (status, Json(json!({ "error": self.user_message() }))).into_response()
    }
}
