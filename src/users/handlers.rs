use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use tracing::instrument;

use super::{
    dto::{DeleteResponse, UserResponse},
    services::{delete_user, get_user, list_users, parse_user_id},
};
use crate::{auth::extractors::AuthUser, errors::AppError, state::AppState};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users/me", get(me))
        .route("/users", get(list_all))
        .route("/users/:user_id", get(get_by_id).delete(delete_by_id))
}

#[instrument(skip_all, fields(user_id = %auth.identity.id))]
pub async fn me(auth: AuthUser) -> Json<UserResponse> {
    Json(UserResponse::from(auth.user))
}

#[instrument(skip_all, fields(user_id = %auth.identity.id))]
pub async fn list_all(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<UserResponse>>, AppError> {
    let users = list_users(&state, &auth.identity).await?;
    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

#[instrument(skip(state, auth))]
pub async fn get_by_id(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<String>,
) -> Result<Json<UserResponse>, AppError> {
    let target = parse_user_id(&user_id)?;
    let user = get_user(&state, &auth.identity, target).await?;
    Ok(Json(UserResponse::from(user)))
}

#[instrument(skip(state, auth))]
pub async fn delete_by_id(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    let target = parse_user_id(&user_id)?;
    delete_user(&state, &auth.identity, target).await?;
    Ok(Json(DeleteResponse {
        message: "User deleted successfully",
        user_id: target,
    }))
}
