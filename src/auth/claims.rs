use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::users::repo_types::Role;

/// JWT payload used for authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user ID
    pub role: Role,  // role at issuance, not re-read from the store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>, // issued at (unix timestamp); tokens without it are accepted
    pub exp: i64, // expires at (unix timestamp)
}

/// Authenticated caller as seen by the access policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub id: Uuid,
    pub role: Role,
}
