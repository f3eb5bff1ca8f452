use anyhow::Context;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, instrument, warn};

use super::{
    dto::{LoginRequest, RegisterRequest},
    password::{hash_password, verify_password},
};
use crate::{
    errors::{AppError, AuthFailure},
    state::AppState,
    users::repo_types::{NewUser, Role, User},
};

const USERNAME_MIN: usize = 3;
const USERNAME_MAX: usize = 50;
const PASSWORD_MIN: usize = 6;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn normalize_email(raw: &str) -> Result<String, AppError> {
    let email = raw.trim().to_lowercase();
    if !is_valid_email(&email) {
        warn!(%email, "invalid email");
        return Err(AppError::Validation("Invalid email".into()));
    }
    Ok(email)
}

fn validate_username(username: &str) -> Result<(), AppError> {
    let len = username.chars().count();
    if !(USERNAME_MIN..=USERNAME_MAX).contains(&len) {
        return Err(AppError::Validation(format!(
            "Username must be between {USERNAME_MIN} and {USERNAME_MAX} characters"
        )));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), AppError> {
    if password.chars().count() < PASSWORD_MIN {
        return Err(AppError::Validation("Password too short".into()));
    }
    Ok(())
}

fn parse_role(raw: Option<&str>) -> Result<Role, AppError> {
    match raw {
        None => Ok(Role::default()),
        Some(r) => r.parse().map_err(|_| {
            AppError::Validation("Role must be one of student, teacher, admin".into())
        }),
    }
}

/// Creates an account. The lookup before insert only short-circuits the
/// common case; the store's unique constraint decides concurrent races.
#[instrument(skip(state, req), fields(username = %req.username))]
pub async fn register_user(state: &AppState, req: RegisterRequest) -> Result<User, AppError> {
    let email = normalize_email(&req.email)?;
    validate_username(&req.username)?;
    validate_password(&req.password)?;
    let role = parse_role(req.role.as_deref())?;

    if state
        .store
        .find_by_email_or_username(&email, &req.username)
        .await?
        .is_some()
    {
        warn!(%email, "email or username already registered");
        return Err(AppError::Duplicate(
            "User with this email or username already exists".into(),
        ));
    }

    let password = req.password;
    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .context("password hashing task")??;

    let user = state
        .store
        .insert(NewUser {
            username: req.username,
            email,
            password_hash,
            full_name: req.full_name,
            role,
        })
        .await?;

    info!(user_id = %user.id, email = %user.email, role = %user.role, "user registered");
    Ok(user)
}

/// Checks credentials and issues an access token.
#[instrument(skip(state, req))]
pub async fn authenticate(state: &AppState, req: LoginRequest) -> Result<String, AppError> {
    let email = normalize_email(&req.email)?;

    let Some(user) = state.store.find_by_email(&email).await? else {
        warn!(%email, "login unknown email");
        return Err(AppError::Unauthenticated(AuthFailure::BadCredentials));
    };

    let password = req.password;
    let hash = user.password_hash.clone();
    let ok = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .context("password verification task")?;

    if !ok {
        warn!(%email, user_id = %user.id, "login invalid password");
        return Err(AppError::Unauthenticated(AuthFailure::BadCredentials));
    }

    let token = state.keys.issue(user.id, user.role)?;
    info!(user_id = %user.id, "user logged in");
    Ok(token)
}
