//! Payment routes for both rails and the subscription itself

use axum::{
    extract::{Extension, Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use vendeai_billing::{AsyncPaymentCreated, AsyncPaymentPoll, CardIntentCreated};
use vendeai_shared::Subscription;

use crate::{auth::AuthUser, error::ApiResult, state::AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRequest {
    pub plan_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmCardRequest {
    pub payment_intent_id: String,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
    pub subscription: Option<Subscription>,
}

pub async fn create_card_intent(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<PlanRequest>,
) -> ApiResult<Json<CardIntentCreated>> {
    let created = state
        .billing()?
        .payments
        .create_card_intent(auth_user.user_id, &req.plan_id)
        .await?;
    Ok(Json(created))
}

/// Called by the client after the card SDK finished; only the intent's owner may confirm
pub async fn confirm_card_payment(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<ConfirmCardRequest>,
) -> ApiResult<Json<SubscriptionResponse>> {
    let subscription = state
        .billing()?
        .payments
        .confirm_card_payment(&req.payment_intent_id, Some(auth_user.user_id))
        .await?;
    Ok(Json(SubscriptionResponse {
        message: Some("Payment confirmed"),
        subscription: Some(subscription),
    }))
}

pub async fn create_pix_payment(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<PlanRequest>,
) -> ApiResult<Json<AsyncPaymentCreated>> {
    let created = state
        .billing()?
        .payments
        .create_async_payment(auth_user.user_id, &req.plan_id)
        .await?;
    Ok(Json(created))
}

pub async fn pix_payment_status(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(payment_id): Path<String>,
) -> ApiResult<Json<AsyncPaymentPoll>> {
    let poll = state
        .billing()?
        .payments
        .poll_async_payment(auth_user.user_id, &payment_id)
        .await?;
    Ok(Json(poll))
}

/// Read straight from the store so it still answers while billing is disabled
pub async fn get_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<SubscriptionResponse>> {
    let subscription = state.store.get_subscription(auth_user.user_id).await?;
    Ok(Json(SubscriptionResponse {
        message: None,
        subscription,
    }))
}

pub async fn cancel_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<SubscriptionResponse>> {
    let subscription = state
        .billing()?
        .payments
        .cancel_subscription(auth_user.user_id)
        .await?;
    Ok(Json(SubscriptionResponse {
        message: Some("Subscription canceled"),
        subscription: Some(subscription),
    }))
}
