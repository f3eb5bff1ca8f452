use axum::extract::FromRef;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use super::claims::{Claims, Identity};
use crate::{state::AppState, users::repo_types::Role};

/// Lifetime of every access token. Not configurable.
pub const ACCESS_TOKEN_TTL: Duration = Duration::hours(24);

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("malformed token")]
    Malformed,
}

/// HS256 signing and verification keys, built once from the configured secret.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        state.keys.clone()
    }
}

impl JwtKeys {
    pub fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn issue(&self, subject: Uuid, role: Role) -> anyhow::Result<String> {
        self.issue_at(subject, role, OffsetDateTime::now_utc())
    }

    pub fn issue_at(
        &self,
        subject: Uuid,
        role: Role,
        issued_at: OffsetDateTime,
    ) -> anyhow::Result<String> {
        let exp = issued_at + ACCESS_TOKEN_TTL;
        let claims = Claims {
            sub: subject.to_string(),
            role,
            iat: Some(issued_at.unix_timestamp()),
            exp: exp.unix_timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;
        debug!(user_id = %subject, %role, "jwt signed");
        Ok(token)
    }

    /// Checks signature and claims, then expiry. A token is expired once
    /// `now >= exp`; there is no leeway.
    pub fn verify(&self, token: &str) -> Result<Identity, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let claims = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|e| {
                debug!(error = %e, "jwt rejected");
                TokenError::Malformed
            })?
            .claims;

        if OffsetDateTime::now_utc().unix_timestamp() >= claims.exp {
            return Err(TokenError::Expired);
        }

        let id = Uuid::parse_str(&claims.sub).map_err(|_| TokenError::Malformed)?;
        debug!(user_id = %id, role = %claims.role, "jwt verified");
        Ok(Identity {
            id,
            role: claims.role,
        })
    }
}
