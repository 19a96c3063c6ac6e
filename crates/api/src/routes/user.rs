//! Profile routes

use axum::{
    extract::{Extension, State},
    Json,
};
use serde::Serialize;
use vendeai_shared::{Principal, ProfileUpdate, Subscription};

use crate::{auth::AuthUser, error::ApiResult, state::AppState};

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub user: Principal,
    pub subscription: Option<Subscription>,
}

#[derive(Debug, Serialize)]
pub struct ProfileUpdatedResponse {
    pub message: &'static str,
    pub user: Principal,
}

pub async fn get_profile(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<ProfileResponse>> {
    let user = state.identity.get_profile(auth_user.user_id).await?;
    let subscription = state.store.get_subscription(auth_user.user_id).await?;
    Ok(Json(ProfileResponse { user, subscription }))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(update): Json<ProfileUpdate>,
) -> ApiResult<Json<ProfileUpdatedResponse>> {
    let user = state.identity.update_profile(auth_user.user_id, update).await?;
    Ok(Json(ProfileUpdatedResponse {
        message: "Profile updated successfully",
        user,
    }))
}
