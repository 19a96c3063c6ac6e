use axum::{
    extract::{Extension, State},
    Json,
};
use vendeai_billing::Entitlement;

use crate::{auth::AuthUser, error::ApiResult, state::AppState};

/// Effective plan, capabilities and remaining AI uses of the caller
pub async fn get_entitlement(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<Entitlement>> {
    Ok(Json(state.entitlements.resolve(auth_user.user_id).await?))
}
