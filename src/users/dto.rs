use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::{Role, User};

/// Outward view of a user. The password hash is never part of it.
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: Option<String>,
    pub role: Role,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub qr_code: Option<String>,
}

impl From<User> for UserResponse {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            username: u.username,
            email: u.email,
            full_name: u.full_name,
            role: u.role,
            created_at: u.created_at,
            qr_code: u.qr_code,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub message: &'static str,
    pub user_id: Uuid,
}
