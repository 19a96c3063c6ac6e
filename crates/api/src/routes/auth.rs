//! Registration, login and logout routes

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use vendeai_shared::{OAuthProvider, Principal};

use crate::{
    auth::{AuthSession, AuthUser, RegisterInput},
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct OAuthLoginRequest {
    pub access_token: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub message: &'static str,
    pub user: Principal,
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

impl AuthResponse {
    fn new(message: &'static str, session: AuthSession) -> Self {
        Self {
            message,
            user: session.user,
            token: session.token,
        }
    }
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterInput>,
) -> ApiResult<(StatusCode, Json<AuthResponse>)> {
    let session = state.identity.register(req).await?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse::new("User registered successfully", session)),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let session = state.identity.login(&req.email, &req.password).await?;
    Ok(Json(AuthResponse::new("Login successful", session)))
}

/// Exchange a provider access token for a session
pub async fn oauth_login(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Json(req): Json<OAuthLoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let provider: OAuthProvider = provider.parse().map_err(ApiError::Validation)?;
    let profile = state.oauth.fetch_profile(provider, &req.access_token).await?;
    let session = state.identity.login_or_register_oauth(profile).await?;
    Ok(Json(AuthResponse::new("Login successful", session)))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<MessageResponse>> {
    state.identity.logout(&auth_user.session_id).await?;
    tracing::info!(user_id = %auth_user.user_id, "Logged out");
    Ok(Json(MessageResponse {
        message: "Logout successful",
    }))
}
