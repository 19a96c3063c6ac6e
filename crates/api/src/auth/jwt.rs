//! Session token signing and validation (HS256)

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;
use vendeai_shared::{Principal, Session};

use crate::error::{ApiError, ApiResult};

/// Fixed lifetime of every issued session
pub const SESSION_LIFETIME: Duration = Duration::days(7);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    pub name: String,
    /// Key of the server-side session row
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

/// A signed token together with the session row it must be stored as
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub session: Session,
}

#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtManager {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn issue(&self, principal: &Principal, now: OffsetDateTime) -> ApiResult<IssuedToken> {
        let expires_at = now + SESSION_LIFETIME;
        let claims = Claims {
            sub: principal.id,
            email: principal.email.clone(),
            name: principal.name.clone(),
            jti: Uuid::new_v4().to_string(),
            iat: now.unix_timestamp(),
            exp: expires_at.unix_timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| ApiError::Internal(format!("jwt encode: {e}")))?;

        Ok(IssuedToken {
            token,
            session: Session {
                token_id: claims.jti,
                user_id: principal.id,
                created_at: now,
                expires_at,
            },
        })
    }

    /// Check signature and expiry; the session row is checked separately
    pub fn validate(&self, token: &str) -> ApiResult<Claims> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "Rejected session token");
                ApiError::Authentication("Invalid or expired session".to_string())
            })
    }
}
