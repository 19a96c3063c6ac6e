//! AI-invoking routes, gated by capability and quota

use axum::{
    extract::{Extension, State},
    Json,
};
use serde::Serialize;
use vendeai_billing::AiUseDecision;
use vendeai_shared::RemainingUses;

use crate::{
    ai::{AiRequest, AiResponse},
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

const UPGRADE_ACTION: &str = "upgrade_plan";

#[derive(Debug, Serialize)]
pub struct AiUseResponse {
    pub allowed: bool,
    pub remaining: RemainingUses,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<&'static str>,
}

impl From<AiUseDecision> for AiUseResponse {
    fn from(decision: AiUseDecision) -> Self {
        match decision {
            AiUseDecision::Granted { remaining } => Self {
                allowed: true,
                remaining,
                action: None,
            },
            AiUseDecision::Exhausted => Self {
                allowed: false,
                remaining: RemainingUses::Count(0),
                action: Some(UPGRADE_ACTION),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AiCompleteResponse {
    #[serde(flatten)]
    pub usage: AiUseResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AiResponse>,
}

/// Reserve one AI use for an action the client performs itself
pub async fn use_ai(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<AiUseResponse>> {
    let decision = state.quota.attempt_ai_use(auth_user.user_id).await?;
    Ok(Json(decision.into()))
}

/// Capability check, then quota reservation, then the provider call.
///
/// The reserved use is given back when the provider call fails, so the
/// counter only counts successful actions.
pub async fn complete(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<AiRequest>,
) -> ApiResult<Json<AiCompleteResponse>> {
    let provider = state.ai()?.clone();
    if req.prompt.trim().is_empty() {
        return Err(ApiError::Validation("prompt is required".to_string()));
    }

    let entitlement = state.entitlements.resolve(auth_user.user_id).await?;
    if !entitlement.has_capability(req.feature) {
        return Err(ApiError::UpgradeRequired(format!(
            "{:?} is not included in the {} plan",
            req.feature, entitlement.plan_name
        )));
    }

    let decision = state.quota.attempt_ai_use(auth_user.user_id).await?;
    if !decision.is_granted() {
        return Ok(Json(AiCompleteResponse {
            usage: decision.into(),
            result: None,
        }));
    }

    match provider.complete(&req).await {
        Ok(result) => Ok(Json(AiCompleteResponse {
            usage: decision.into(),
            result: Some(result),
        })),
        Err(e) => {
            if let Err(release_err) = state.quota.release_ai_use(auth_user.user_id).await {
                tracing::error!(
                    user_id = %auth_user.user_id,
                    error = %release_err,
                    "Failed to release AI use after provider error"
                );
            }
            tracing::warn!(user_id = %auth_user.user_id, error = %e, "AI completion failed");
            Err(e.into())
        }
    }
}
