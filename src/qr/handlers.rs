use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use super::{
    dto::QrCodeResponse,
    services::{generate_own, stored_for},
};
use crate::{
    auth::extractors::AuthUser, errors::AppError, state::AppState,
    users::services::parse_user_id,
};

pub fn qr_routes() -> Router<AppState> {
    Router::new()
        .route("/qr/generate", post(generate))
        .route("/qr/:user_id", get(get_for_user))
}

#[instrument(skip_all, fields(user_id = %auth.identity.id))]
pub async fn generate(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<QrCodeResponse>, AppError> {
    Ok(Json(generate_own(&state, &auth).await?))
}

#[instrument(skip(state, auth))]
pub async fn get_for_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<String>,
) -> Result<Json<QrCodeResponse>, AppError> {
    let target = parse_user_id(&user_id)?;
    Ok(Json(stored_for(&state, &auth.identity, target).await?))
}
