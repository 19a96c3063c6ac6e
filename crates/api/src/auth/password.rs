//! Argon2id password hashing
//!
//! Hashing and verification are CPU-bound, so both run on the blocking pool.

use std::sync::OnceLock;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

use crate::error::{ApiError, ApiResult};

/// Minimum accepted password length in characters
pub const MIN_PASSWORD_LEN: usize = 8;

/// Hash of a throwaway secret, verified against when the e-mail is unknown
static DUMMY_HASH: OnceLock<Option<String>> = OnceLock::new();

fn hash_blocking(password: &str) -> ApiResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError::Internal(format!("password hashing failed: {e}")))
}

fn verify_blocking(password: &str, hash: &str) -> ApiResult<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| ApiError::Internal(format!("invalid password hash format: {e}")))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

fn dummy_hash() -> Option<&'static str> {
    DUMMY_HASH
        .get_or_init(|| hash_blocking("vendeai-dummy-password").ok())
        .as_deref()
}

pub fn validate_password_strength(password: &str) -> ApiResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

pub async fn hash_password(password: String) -> ApiResult<String> {
    tokio::task::spawn_blocking(move || hash_blocking(&password))
        .await
        .map_err(|e| ApiError::Internal(format!("hashing task failed: {e}")))?
}

pub async fn verify_password(password: String, hash: String) -> ApiResult<bool> {
    tokio::task::spawn_blocking(move || verify_blocking(&password, &hash))
        .await
        .map_err(|e| ApiError::Internal(format!("verification task failed: {e}")))?
}

/// Spend the same work as a real verification and always fail.
///
/// Called for unknown accounts so response time does not reveal whether an
/// e-mail is registered.
pub async fn verify_against_dummy(password: String) {
    let outcome = tokio::task::spawn_blocking(move || match dummy_hash() {
        Some(hash) => verify_blocking(&password, hash).map(|_| ()),
        None => Ok(()),
    })
    .await;
    if let Ok(Err(e)) = outcome {
        tracing::warn!(error = %e, "Dummy password verification failed");
    }
}
