//! Role-based access decisions.
//!
//! Pure functions only: callers resolve whether a target exists before asking
//! whether the actor may touch it.

use tracing::warn;
use uuid::Uuid;

use super::claims::Identity;
use crate::{errors::AppError, users::repo_types::Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ListAllUsers,
    ReadUser(Uuid),
    ReadQr(Uuid),
    DeleteUser(Uuid),
    /// Generation always targets the caller; there is no cross-user variant.
    GenerateOwnQr,
}

impl Action {
    fn denial(&self) -> &'static str {
        match self {
            Action::ListAllUsers => "Not authorized. Admin access required.",
            Action::ReadUser(_) => "Not authorized to view this user",
            Action::ReadQr(_) => "Not authorized to view this QR code",
            Action::DeleteUser(_) => "Not authorized to delete this user",
            Action::GenerateOwnQr => "Not authorized to generate a QR code",
        }
    }
}

fn is_admin(role: Role) -> bool {
    match role {
        Role::Admin => true,
        Role::Student | Role::Teacher => false,
    }
}

pub fn is_allowed(actor: &Identity, action: Action) -> bool {
    match action {
        Action::ListAllUsers => is_admin(actor.role),
        Action::ReadUser(target) | Action::ReadQr(target) => {
            actor.id == target || is_admin(actor.role)
        }
        Action::DeleteUser(target) => actor.id == target || is_admin(actor.role),
        Action::GenerateOwnQr => true,
    }
}

pub fn authorize(actor: &Identity, action: Action) -> Result<(), AppError> {
    if is_allowed(actor, action) {
        return Ok(());
    }
    warn!(actor = %actor.id, role = %actor.role, ?action, "access denied");
    Err(AppError::Forbidden(action.denial().into()))
}
