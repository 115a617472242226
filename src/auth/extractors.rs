use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts, Request},
    http::request::Parts,
    Json,
};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::claims::Claims;
use crate::{error::AuthError, state::AppState, users::repo_types::ADMIN_ROLE};

/// Extracts and validates the bearer JWT, yielding its claims.
pub struct AuthUser(pub Claims);

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.0.role == ADMIN_ROLE
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        // Read Authorization header
        let auth = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| AuthError::InvalidToken("missing Authorization header".into()))?;

        // Expect "Bearer <token>"
        let token = auth
            .strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("bearer "))
            .ok_or_else(|| AuthError::InvalidToken("invalid auth scheme".into()))?;

        let claims = state.auth.signer().verify(token.trim()).map_err(|e| {
            warn!(error = %e, "invalid or expired token");
            e
        })?;

        Ok(AuthUser(claims))
    }
}

/// `Json<T>` whose rejection is an `AuthError`, so malformed bodies get the
/// same `{"error": ..}` 400 as every other client error.
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(JsonBody(value)),
            Err(rejection) => {
                debug!(error = %rejection.body_text(), "request body rejected");
                Err(AuthError::validation("Invalid request"))
            }
        }
    }
}
