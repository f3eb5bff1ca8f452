use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use tracing::instrument;

use super::{
    dto::{LoginRequest, RegisterRequest, TokenResponse},
    extractors::JsonBody,
    services::{authenticate, register_user},
};
use crate::{errors::AppError, state::AppState, users::dto::UserResponse};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<RegisterRequest>,
) -> Result<(StatusCode, Json<UserResponse>), AppError> {
    let user = register_user(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(UserResponse::from(user))))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<LoginRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    let token = authenticate(&state, payload).await?;
    Ok(Json(TokenResponse::bearer(token)))
}
