use axum::{
    extract::{Path, State},
    routing::{get, put},
    Json, Router,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{dto::PublicUser, repo_types::UserPatch};
use crate::{auth::extractors::{AuthUser, JsonBody}, error::AuthError, state::AppState};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/:id", get(get_user))
        .route("/users/update/:id", put(update_user).patch(update_user))
}

#[instrument(skip(state, _auth))]
pub async fn list_users(
    State(state): State<AppState>,
    _auth: AuthUser,
) -> Result<Json<Vec<PublicUser>>, AuthError> {
    let users = state.repo.list_users().await.map_err(AuthError::Storage)?;
    Ok(Json(users.into_iter().map(PublicUser::from).collect()))
}

#[instrument(skip(state, _auth))]
pub async fn get_user(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<PublicUser>, AuthError> {
    let user = state
        .repo
        .get_user_by_id(id)
        .await
        .map_err(AuthError::Storage)?
        .ok_or(AuthError::UserNotFound)?;
    Ok(Json(user.into()))
}

/// Users may edit themselves; admins may edit anyone. Only admins change roles.
#[instrument(skip(state, auth, patch))]
pub async fn update_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    JsonBody(patch): JsonBody<UserPatch>,
) -> Result<Json<PublicUser>, AuthError> {
    if auth.0.sub != id && !auth.is_admin() {
        warn!(actor = %auth.0.sub, target = %id, "update of another user denied");
        return Err(AuthError::Forbidden);
    }
    let mut patch = patch.validate()?;
    if patch.role.is_some() && !auth.is_admin() {
        return Err(AuthError::Forbidden);
    }

    if let Some(email) = &patch.email {
        let taken = state
            .repo
            .get_user_by_email(email)
            .await
            .map_err(AuthError::Storage)?
            .is_some_and(|u| u.id != id);
        if taken {
            return Err(AuthError::EmailTaken);
        }
    }

    if let Some(plain) = patch.password.take() {
        patch.password = Some(state.auth.hasher().hash_blocking(plain).await?);
    }

    let user = state
        .repo
        .update_user(id, &patch)
        .await
        .map_err(AuthError::storage)?
        .ok_or(AuthError::UserNotFound)?;

    info!(actor = %auth.0.sub, user_id = %user.id, "user updated");
    Ok(Json(user.into()))
}
