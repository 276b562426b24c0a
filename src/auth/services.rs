use argon2::{password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum::extract::FromRef;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use lazy_static::lazy_static;
use rand::rngs::OsRng;
use regex::Regex;
use std::time::Duration;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{debug, error};
use uuid::Uuid;

pub(crate) use crate::auth::dto::{Claims, JwtKeys};
use crate::auth::dto::{LoginRequest, RegisterRequest};
use crate::config::JwtConfig;
use crate::error::ApiError;
use crate::state::AppState;

const MAX_FIELD_LEN: usize = 255;
const MIN_PASSWORD_LEN: usize = 6;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn check_email(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err("email is required".into());
    }
    if !is_valid_email(email) {
        return Err("email format is invalid".into());
    }
    if email.len() > MAX_FIELD_LEN {
        return Err("email must not exceed 255 characters".into());
    }
    Ok(())
}

fn check_password(password: &str) -> Result<(), String> {
    if password.is_empty() {
        return Err("password is required".into());
    }
    if password.len() < MIN_PASSWORD_LEN {
        return Err("password must be at least 6 characters".into());
    }
    Ok(())
}

fn check_username(username: &str) -> Result<(), String> {
    if username.is_empty() {
        return Err("username is required".into());
    }
    if username.len() > MAX_FIELD_LEN {
        return Err("username must not exceed 255 characters".into());
    }
    Ok(())
}

/// Shape checks for login. First failing rule wins; no store access here.
pub(crate) fn validate_login(payload: &LoginRequest) -> Result<(), ApiError> {
    check_email(&payload.email)
        .and_then(|_| check_password(&payload.password))
        .map_err(ApiError::InvalidInput)
}

/// Shape checks for registration. Uniqueness is checked against the store
/// by the handler, after these pass.
pub(crate) fn validate_register(payload: &RegisterRequest) -> Result<(), ApiError> {
    check_username(&payload.username)
        .and_then(|_| check_email(&payload.email))
        .and_then(|_| check_password(&payload.password))
        .and_then(|_| {
            if payload.password != payload.password_confirmation {
                Err("password confirmation does not match".into())
            } else {
                Ok(())
            }
        })
        .map_err(ApiError::InvalidInput)
}

pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            anyhow::anyhow!(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

pub fn verify_password(plain: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "argon2 parse hash error");
        anyhow::anyhow!(e.to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        let JwtConfig {
            secret,
            issuer,
            audience,
            ttl_minutes,
            refresh_ttl_minutes,
        } = state.config.jwt.clone();
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer,
            audience,
            ttl: Duration::from_secs((ttl_minutes as u64) * 60),
            refresh_ttl: Duration::from_secs((refresh_ttl_minutes as u64) * 60),
        }
    }
}

impl JwtKeys {
    /// Token lifetime in seconds, as reported in `expires_in`.
    pub fn expires_in(&self) -> u64 {
        self.ttl.as_secs()
    }

    pub fn sign(&self, user_id: Uuid) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let exp = now + TimeDuration::seconds(self.ttl.as_secs() as i64);
        let claims = Claims {
            sub: user_id,
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(user_id = %user_id, "jwt signed");
        Ok(token)
    }

    pub fn verify(&self, token: &str) -> anyhow::Result<Claims> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        debug!(user_id = %data.claims.sub, "jwt verified");
        Ok(data.claims)
    }

    /// Rotate a token: mint a fresh one with full TTL for the same subject.
    /// Expiry is deliberately not checked; the refresh window
    /// (`iat + refresh_ttl`) bounds how stale the old token may be.
    pub fn refresh(&self, token: &str) -> anyhow::Result<String> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        validation.validate_exp = false;
        let data = decode::<Claims>(token, &self.decoding, &validation)?;

        let now = OffsetDateTime::now_utc().unix_timestamp();
        let deadline = data.claims.iat as i64 + self.refresh_ttl.as_secs() as i64;
        if now > deadline {
            anyhow::bail!("refresh window elapsed");
        }
        self.sign(data.claims.sub)
    }
}
