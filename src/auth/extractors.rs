use axum::{
    async_trait,
    extract::{FromRef, FromRequest, FromRequestParts},
    http::request::Parts,
};
use tracing::warn;

use super::{
    claims::Identity,
    jwt::{JwtKeys, TokenError},
};
use crate::{
    errors::{AppError, AuthFailure},
    state::AppState,
    users::repo_types::User,
};

/// `Json` body whose rejections render as `AppError::Validation`.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct JsonBody<T>(pub T);

/// Bearer-authenticated caller: the token's identity plus the stored record
/// its subject resolves to.
pub struct AuthUser {
    pub identity: Identity,
    pub user: User,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(bearer_token)
            .ok_or(AppError::Unauthenticated(AuthFailure::MissingToken))?;

        let keys = JwtKeys::from_ref(state);
        let identity = keys.verify(token).map_err(|e| {
            warn!(error = %e, "bearer token rejected");
            AppError::Unauthenticated(match e {
                TokenError::Expired => AuthFailure::Expired,
                TokenError::Malformed => AuthFailure::InvalidToken,
            })
        })?;

        let user = state
            .store
            .find_by_id(identity.id)
            .await?
            .ok_or_else(|| {
                warn!(user_id = %identity.id, "token subject no longer exists");
                AppError::Unauthenticated(AuthFailure::UnknownSubject)
            })?;

        Ok(AuthUser { identity, user })
    }
}

/// Token part of `Bearer <token>`; scheme is case-insensitive.
fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}
