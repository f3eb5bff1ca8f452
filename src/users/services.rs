use tracing::{info, instrument};
use uuid::Uuid;

use super::repo_types::User;
use crate::{
    auth::{
        claims::Identity,
        policy::{authorize, Action},
    },
    errors::AppError,
    state::AppState,
};

/// Path ids must be UUIDs; anything else is a client error, not a lookup miss.
pub fn parse_user_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::Validation("Invalid user ID format".into()))
}

pub(crate) fn user_not_found() -> AppError {
    AppError::NotFound("User not found".into())
}

/// Looks up `target`, then checks `action` against the actor. A missing
/// user is reported as not-found before the policy is consulted.
pub async fn load_authorized(
    state: &AppState,
    actor: &Identity,
    target: Uuid,
    action: fn(Uuid) -> Action,
) -> Result<User, AppError> {
    let user = state
        .store
        .find_by_id(target)
        .await?
        .ok_or_else(user_not_found)?;
    authorize(actor, action(user.id))?;
    Ok(user)
}

#[instrument(skip(state))]
pub async fn list_users(state: &AppState, actor: &Identity) -> Result<Vec<User>, AppError> {
    authorize(actor, Action::ListAllUsers)?;
    Ok(state.store.list_all().await?)
}

#[instrument(skip(state))]
pub async fn get_user(state: &AppState, actor: &Identity, target: Uuid) -> Result<User, AppError> {
    load_authorized(state, actor, target, Action::ReadUser).await
}

/// Deletion checks the policy first; it never reveals anything a denied
/// caller could not already infer.
#[instrument(skip(state))]
pub async fn delete_user(state: &AppState, actor: &Identity, target: Uuid) -> Result<(), AppError> {
    authorize(actor, Action::DeleteUser(target))?;
    if !state.store.delete_by_id(target).await? {
        return Err(user_not_found());
    }
    info!(user_id = %target, by = %actor.id, "user deleted");
    Ok(())
}
