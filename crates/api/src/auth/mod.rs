//! Authentication module for VendeAI

pub mod identity;
pub mod jwt;
pub mod middleware;
pub mod oauth;
pub mod password;
pub mod sessions;

pub use identity::{normalize_email, validate_name, AuthSession, IdentityService, RegisterInput};
pub use jwt::{Claims, IssuedToken, JwtManager, SESSION_LIFETIME};
pub use middleware::{require_auth, AuthUser};
pub use oauth::{HttpOAuthVerifier, OAuthProfile, OAuthVerifier};
pub use password::{hash_password, validate_password_strength, verify_password};
