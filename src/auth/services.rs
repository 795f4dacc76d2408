use lazy_static::lazy_static;
use regex::Regex;
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    dto::{AuthResponse, RegisterRequest},
    jwt::JwtKeys,
    password::{generate_reset_token, hash_password, verify_password},
};
use crate::{
    error::AppError,
    state::AppState,
    users::{
        model::{Redact, UserRecord, UserStatus},
        repo::NewUser,
    },
};

pub const MIN_PASSWORD_LEN: usize = 8;

pub fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Trimmed, lower-cased and validated email.
pub fn normalize_email(raw: &str) -> Result<String, AppError> {
    let email = raw.trim().to_lowercase();
    if !is_valid_email(&email) {
        return Err(AppError::InvalidEmail);
    }
    Ok(email)
}

pub fn check_password_len(password: &str) -> Result<(), AppError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::PasswordTooShort);
    }
    Ok(())
}

fn issue(keys: &JwtKeys, user: UserRecord) -> Result<AuthResponse, AppError> {
    let access_token = keys.sign_access(user.id)?;
    let refresh_token = keys.sign_refresh(user.id)?;
    Ok(AuthResponse {
        access_token,
        refresh_token,
        user: user.redact(),
    })
}

pub async fn register(state: &AppState, req: RegisterRequest) -> Result<AuthResponse, AppError> {
    let email = normalize_email(&req.email)?;
    check_password_len(&req.password)?;

    let first_name = req.first_name.trim().to_owned();
    let last_name = req.last_name.trim().to_owned();
    if first_name.is_empty() || last_name.is_empty() {
        return Err(AppError::MissingData);
    }

    if state.users.find_by_email(&email).await?.is_some() {
        return Err(AppError::EmailTaken);
    }

    let password_hash = hash_password(&req.password)?;
    let user = state
        .users
        .create(NewUser {
            first_name,
            last_name,
            email,
            password_hash,
        })
        .await?;

    info!(user_id = %user.id, "user registered");
    issue(&JwtKeys::from(&state.config.jwt), user)
}

pub async fn login(
    state: &AppState,
    email: &str,
    password: &str,
    client_ip: &str,
) -> Result<AuthResponse, AppError> {
    let email = normalize_email(email)?;

    let Some(mut user) = state.users.find_by_email(&email).await? else {
        warn!("login with unknown email");
        return Err(AppError::InvalidCredentials);
    };

    if !verify_password(password, &user.password_hash)? {
        warn!(user_id = %user.id, "login invalid password");
        return Err(AppError::InvalidCredentials);
    }

    if user.active == UserStatus::Disabled {
        warn!(user_id = %user.id, "login to disabled account");
        return Err(AppError::AccountDisabled);
    }

    let now = OffsetDateTime::now_utc();
    state.users.record_login(user.id, now, client_ip).await?;
    user.last_login = Some(now);
    user.login_ip = client_ip.to_owned();

    info!(user_id = %user.id, "user logged in");
    issue(&JwtKeys::from(&state.config.jwt), user)
}

pub async fn refresh(state: &AppState, refresh_token: &str) -> Result<AuthResponse, AppError> {
    let keys = JwtKeys::from(&state.config.jwt);
    let claims = keys.verify_refresh(refresh_token).map_err(|e| {
        warn!(error = %e, "refresh rejected");
        AppError::Unauthorized("Invalid or expired token")
    })?;

    let user = state
        .users
        .find_by_id(claims.sub)
        .await?
        .ok_or(AppError::Unauthorized("User not found"))?;
    if user.active == UserStatus::Disabled {
        return Err(AppError::AccountDisabled);
    }
    issue(&keys, user)
}

/// Stores a fresh reset token for `email` and returns it for delivery.
/// Unknown addresses yield `Ok(None)` so callers can answer uniformly.
pub async fn forgot_password(state: &AppState, email: &str) -> Result<Option<String>, AppError> {
    let Ok(email) = normalize_email(email) else {
        return Ok(None);
    };
    let Some(user) = state.users.find_by_email(&email).await? else {
        return Ok(None);
    };

    let token = generate_reset_token();
    let expires_at =
        OffsetDateTime::now_utc() + Duration::minutes(state.config.reset_token_ttl_minutes);
    state.users.set_reset_token(user.id, &token, expires_at).await?;
    info!(user_id = %user.id, %expires_at, "password reset requested");
    Ok(Some(token))
}

pub async fn reset_password(state: &AppState, token: &str, password: &str) -> Result<Uuid, AppError> {
    check_password_len(password)?;

    let user = state
        .users
        .find_by_reset_token(token)
        .await?
        .ok_or(AppError::InvalidResetToken)?;

    let expired = user
        .reset_token_exp
        .map_or(true, |exp| exp <= OffsetDateTime::now_utc());
    if expired {
        warn!(user_id = %user.id, "expired reset token");
        return Err(AppError::InvalidResetToken);
    }

    let hash = hash_password(password)?;
    state.users.reset_password(user.id, &hash).await?;
    info!(user_id = %user.id, "password reset");
    Ok(user.id)
}
