//! Provider-facing webhook endpoints
//!
//! Authentic notifications are always acknowledged with 200, whatever the
//! processing outcome, so providers do not retry on our internal failures.
//! Only unauthenticated or unreadable requests get a 4xx.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use vendeai_billing::{BillingError, WebhookOutcome};

use crate::state::AppState;

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn log_outcome(rail: &'static str, outcome: &WebhookOutcome) {
    match outcome {
        WebhookOutcome::Applied(sub) => tracing::info!(
            rail,
            user_id = %sub.user_id,
            plan_id = %sub.plan_id,
            "Webhook applied"
        ),
        WebhookOutcome::Ignored(reason) => {
            tracing::debug!(rail, reason = %reason, "Webhook ignored")
        }
        WebhookOutcome::Failed(reason) => {
            tracing::warn!(rail, reason = %reason, "Webhook acknowledged with failure")
        }
    }
}

fn rejected(e: BillingError) -> Response {
    tracing::warn!(error = %e, "Webhook rejected");
    (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))).into_response()
}

pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let billing = match state.billing() {
        Ok(billing) => billing,
        Err(e) => return e.into_response(),
    };
    let Some(signature) = header(&headers, "stripe-signature") else {
        return rejected(BillingError::WebhookSignatureInvalid);
    };

    match billing.webhooks.handle_card_webhook(&body, signature).await {
        Ok(outcome) => {
            log_outcome("card", &outcome);
            Json(json!({ "received": true })).into_response()
        }
        Err(e) => rejected(e),
    }
}

pub async fn mercadopago_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let billing = match state.billing() {
        Ok(billing) => billing,
        Err(e) => return e.into_response(),
    };
    let (Some(signature), Some(request_id)) = (
        header(&headers, "x-signature"),
        header(&headers, "x-request-id"),
    ) else {
        return rejected(BillingError::WebhookSignatureInvalid);
    };

    match billing
        .webhooks
        .handle_async_webhook(&body, signature, request_id)
        .await
    {
        Ok(outcome) => {
            log_outcome("async", &outcome);
            (StatusCode::OK, "OK").into_response()
        }
        Err(e) => rejected(e),
    }
}
