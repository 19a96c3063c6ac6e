//! Authentication middleware for Axum

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// Authenticated principal extracted from a bearer token
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: String,
    pub name: String,
    /// Session row backing the token, deleted on logout
    pub session_id: String,
}

/// Extract bearer token from the Authorization header
fn extract_bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Middleware that requires a live session
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    let Some(token) = extract_bearer_token(&request).map(String::from) else {
        tracing::debug!(path = %path, "require_auth: no bearer token");
        return ApiError::Authentication("Authentication required".to_string()).into_response();
    };

    match state.identity.authenticate(&token).await {
        Ok((principal, claims)) => {
            tracing::debug!(path = %path, user_id = %principal.id, "require_auth: authenticated");
            request.extensions_mut().insert(AuthUser {
                user_id: principal.id,
                email: principal.email,
                name: principal.name,
                session_id: claims.jti,
            });
            next.run(request).await
        }
        Err(err) => {
            tracing::info!(path = %path, error = %err, "require_auth: authentication failed");
            err.into_response()
        }
    }
}
