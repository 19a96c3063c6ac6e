//! Identity provider adapter: password and OAuth login, logout, profile
//!
//! Every successful login, registration or OAuth callback issues exactly one
//! new session. Existing sessions of the principal are left alone so several
//! devices can stay signed in.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;
use vendeai_shared::{NewPrincipal, Principal, ProfileUpdate, Store, StoreError};

use super::jwt::{Claims, JwtManager};
use super::oauth::OAuthProfile;
use super::{password, sessions};
use crate::error::{ApiError, ApiResult};

const NAME_MIN_CHARS: usize = 2;
const NAME_MAX_CHARS: usize = 50;

/// Same message for unknown e-mail and wrong password
const INVALID_CREDENTIALS: &str = "Invalid email or password";

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterInput {
    pub email: String,
    pub password: String,
    pub name: String,
}

/// Principal plus the bearer token of its new session
#[derive(Debug, Clone, Serialize)]
pub struct AuthSession {
    pub user: Principal,
    pub token: String,
}

/// Lowercase and check the e-mail shape: one `@`, non-empty local part and a
/// dotted domain.
pub fn normalize_email(raw: &str) -> ApiResult<String> {
    let email = raw.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        return Err(ApiError::Validation("invalid email address".to_string()));
    }
    Ok(email)
}

pub fn validate_name(raw: &str) -> ApiResult<String> {
    let name = raw.trim();
    let len = name.chars().count();
    if !(NAME_MIN_CHARS..=NAME_MAX_CHARS).contains(&len) {
        return Err(ApiError::Validation(format!(
            "name must be between {NAME_MIN_CHARS} and {NAME_MAX_CHARS} characters"
        )));
    }
    Ok(name.to_string())
}

/// Display name for an OAuth account whose provider sent none
fn oauth_display_name(profile: &OAuthProfile, email: &str) -> String {
    let trimmed = profile.name.trim();
    if trimmed.chars().count() >= NAME_MIN_CHARS {
        return trimmed.chars().take(NAME_MAX_CHARS).collect();
    }
    email.split('@').next().unwrap_or("user").to_string()
}

#[derive(Clone)]
pub struct IdentityService {
    store: Arc<dyn Store>,
    jwt: JwtManager,
}

impl IdentityService {
    pub fn new(store: Arc<dyn Store>, jwt: JwtManager) -> Self {
        Self { store, jwt }
    }

    pub async fn register(&self, input: RegisterInput) -> ApiResult<AuthSession> {
        let email = normalize_email(&input.email)?;
        password::validate_password_strength(&input.password)?;
        let name = validate_name(&input.name)?;

        if self.store.find_principal_by_email(&email).await?.is_some() {
            return Err(ApiError::Conflict("Email already registered".to_string()));
        }

        let password_hash = password::hash_password(input.password).await?;
        let principal = self
            .store
            .create_principal(NewPrincipal {
                email,
                name,
                avatar: None,
                password_hash: Some(password_hash),
                oauth: None,
                email_verified: false,
            })
            .await
            .map_err(|e| match e {
                StoreError::Conflict(_) => {
                    ApiError::Conflict("Email already registered".to_string())
                }
                other => other.into(),
            })?;

        tracing::info!(user_id = %principal.id, "Principal registered");
        self.start_session(principal).await
    }

    pub async fn login(&self, email: &str, password: &str) -> ApiResult<AuthSession> {
        let invalid = || ApiError::Authentication(INVALID_CREDENTIALS.to_string());
        let Ok(email) = normalize_email(email) else {
            return Err(invalid());
        };

        let principal = self.store.find_principal_by_email(&email).await?;
        let hash = principal.as_ref().and_then(|p| p.password_hash.clone());

        let (Some(principal), Some(hash)) = (principal, hash) else {
            password::verify_against_dummy(password.to_string()).await;
            tracing::info!("Login failed");
            return Err(invalid());
        };

        if !password::verify_password(password.to_string(), hash).await? {
            tracing::info!(user_id = %principal.id, "Login failed");
            return Err(invalid());
        }

        tracing::info!(user_id = %principal.id, "Password login");
        self.start_session(principal).await
    }

    /// Log in with a provider-asserted identity, creating the account if needed.
    ///
    /// Lookup order is the provider identity, then the e-mail, then a new
    /// account. An existing account is only adopted through its e-mail when the
    /// provider reports that e-mail as verified.
    pub async fn login_or_register_oauth(&self, profile: OAuthProfile) -> ApiResult<AuthSession> {
        if let Some(principal) = self
            .store
            .find_principal_by_oauth(profile.provider, &profile.provider_id)
            .await?
        {
            tracing::info!(user_id = %principal.id, provider = %profile.provider, "OAuth login");
            return self.start_session(principal).await;
        }

        let email = normalize_email(&profile.email)?;

        if let Some(existing) = self.store.find_principal_by_email(&email).await? {
            if !profile.email_verified {
                tracing::warn!(
                    user_id = %existing.id,
                    provider = %profile.provider,
                    "Refusing to link OAuth identity with unverified e-mail"
                );
                return Err(ApiError::Authentication(
                    "An account with this e-mail already exists; log in with your password first"
                        .to_string(),
                ));
            }
            let linked = self
                .store
                .link_oauth_identity(existing.id, profile.provider, &profile.provider_id)
                .await?;
            tracing::info!(
                user_id = %linked.id,
                provider = %profile.provider,
                "OAuth identity linked to existing account"
            );
            return self.start_session(linked).await;
        }

        let created = self
            .store
            .create_principal(NewPrincipal {
                name: oauth_display_name(&profile, &email),
                email,
                avatar: profile.avatar.clone(),
                password_hash: None,
                oauth: Some((profile.provider, profile.provider_id.clone())),
                email_verified: profile.email_verified,
            })
            .await;

        let principal = match created {
            Ok(p) => p,
            // A concurrent callback for the same identity won the insert
            Err(StoreError::Conflict(_)) => self
                .store
                .find_principal_by_oauth(profile.provider, &profile.provider_id)
                .await?
                .ok_or_else(|| ApiError::Conflict("Account already exists".to_string()))?,
            Err(e) => return Err(e.into()),
        };

        tracing::info!(user_id = %principal.id, provider = %profile.provider, "OAuth registration");
        self.start_session(principal).await
    }

    /// Resolve a bearer token to its principal and session claims
    pub async fn authenticate(&self, token: &str) -> ApiResult<(Principal, Claims)> {
        let claims = self.jwt.validate(token)?;
        let now = OffsetDateTime::now_utc();

        if !sessions::is_session_valid(self.store.as_ref(), &claims.jti, claims.sub, now).await? {
            tracing::debug!(user_id = %claims.sub, "Session revoked or expired");
            return Err(ApiError::Authentication(
                "Session expired, please log in again".to_string(),
            ));
        }

        let principal = self
            .store
            .find_principal(claims.sub)
            .await?
            .ok_or_else(|| ApiError::Authentication("Account no longer exists".to_string()))?;

        Ok((principal, claims))
    }

    /// Delete the session; later use of the same token is rejected
    pub async fn logout(&self, session_id: &str) -> ApiResult<()> {
        sessions::revoke_session(self.store.as_ref(), session_id).await?;
        Ok(())
    }

    pub async fn get_profile(&self, user_id: Uuid) -> ApiResult<Principal> {
        self.store
            .find_principal(user_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("User not found".to_string()))
    }

    pub async fn update_profile(&self, user_id: Uuid, update: ProfileUpdate) -> ApiResult<Principal> {
        let update = ProfileUpdate {
            name: update.name.as_deref().map(validate_name).transpose()?,
            avatar: update.avatar,
            locale: update.locale,
        };
        let principal = self.store.update_profile(user_id, update).await?;
        tracing::info!(user_id = %user_id, "Profile updated");
        Ok(principal)
    }

    async fn start_session(&self, principal: Principal) -> ApiResult<AuthSession> {
        let issued = self.jwt.issue(&principal, OffsetDateTime::now_utc())?;
        sessions::save_session(self.store.as_ref(), &issued.session).await?;
        Ok(AuthSession {
            user: principal,
            token: issued.token,
        })
    }
}
