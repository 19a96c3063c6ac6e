//! Webhook reconciliation for both payment rails
//!
//! Signatures are verified before a notification is acted on. Once a
//! notification is authentic it is always acknowledged: processing failures are logged and
//! reported as [`WebhookOutcome::Failed`], never as an error the provider
//! would retry on.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use time::OffsetDateTime;
use vendeai_shared::Subscription;

use crate::error::{BillingError, BillingResult};
use crate::payments::PaymentOrchestrator;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed card notification
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

const CARD_SUCCEEDED: &str = "payment_intent.succeeded";

/// What happened to an authentic notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Applied(Box<Subscription>),
    Ignored(String),
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct WebhookSecrets {
    pub card: String,
    pub async_rail: String,
}

#[derive(Deserialize)]
struct CardEvent {
    id: String,
    #[serde(rename = "type")]
    type_: String,
    data: CardEventData,
}

#[derive(Deserialize)]
struct CardEventData {
    object: CardEventObject,
}

#[derive(Deserialize)]
struct CardEventObject {
    id: String,
}

#[derive(Deserialize)]
struct AsyncNotification {
    #[serde(rename = "type")]
    type_: Option<String>,
    data: AsyncNotificationData,
}

#[derive(Deserialize)]
struct AsyncNotificationData {
    id: serde_json::Value,
    status: Option<String>,
}

impl AsyncNotificationData {
    /// The provider sends the id as a number or a string
    fn payment_id(&self) -> Option<String> {
        match &self.id {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

pub(crate) fn compute_signature(secret: &str, message: &str) -> BillingResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| {
        tracing::error!("Invalid webhook secret key");
        BillingError::WebhookSignatureInvalid
    })?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn signatures_match(computed: &str, received: &str) -> bool {
    computed.as_bytes().ct_eq(received.as_bytes()).into()
}

/// Split a `k=v,k=v` signature header, keeping repeated keys
fn header_pairs(header: &str) -> impl Iterator<Item = (&str, &str)> {
    header
        .split(',')
        .filter_map(|part| part.trim().split_once('='))
        .map(|(k, v)| (k.trim(), v.trim()))
}

/// Verify a `t=<unix>,v1=<hex>` card signature over `"{t}.{payload}"`
pub fn verify_card_signature(
    payload: &str,
    header: &str,
    secret: &str,
    now: OffsetDateTime,
) -> BillingResult<()> {
    let mut timestamp: Option<i64> = None;
    let mut candidates = Vec::new();
    for (key, value) in header_pairs(header) {
        match key {
            "t" => timestamp = value.parse().ok(),
            "v1" => candidates.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        tracing::warn!("Missing timestamp in card signature header");
        BillingError::WebhookSignatureInvalid
    })?;
    if candidates.is_empty() {
        tracing::warn!("Missing v1 signature in card signature header");
        return Err(BillingError::WebhookSignatureInvalid);
    }

    let age = (now.unix_timestamp() - timestamp).abs();
    if age > SIGNATURE_TOLERANCE_SECS {
        tracing::warn!(timestamp, age, "Card webhook timestamp outside tolerance");
        return Err(BillingError::WebhookSignatureInvalid);
    }

    let computed = compute_signature(secret, &format!("{timestamp}.{payload}"))?;
    if candidates.iter().any(|c| signatures_match(&computed, c)) {
        Ok(())
    } else {
        tracing::warn!("Card webhook signature mismatch");
        Err(BillingError::WebhookSignatureInvalid)
    }
}

/// Verify a `ts=<ts>,v1=<hex>` async-rail signature over
/// `id:{data.id};request-id:{request_id};ts:{ts};`
pub fn verify_async_signature(
    data_id: &str,
    request_id: &str,
    header: &str,
    secret: &str,
) -> BillingResult<()> {
    let mut ts = None;
    let mut v1 = None;
    for (key, value) in header_pairs(header) {
        match key {
            "ts" => ts = Some(value),
            "v1" => v1 = Some(value),
            _ => {}
        }
    }
    let (Some(ts), Some(v1)) = (ts, v1) else {
        tracing::warn!("Async webhook signature header incomplete");
        return Err(BillingError::WebhookSignatureInvalid);
    };

    let manifest = format!("id:{data_id};request-id:{request_id};ts:{ts};");
    let computed = compute_signature(secret, &manifest)?;
    if signatures_match(&computed, v1) {
        Ok(())
    } else {
        tracing::warn!(data_id, "Async webhook signature mismatch");
        Err(BillingError::WebhookSignatureInvalid)
    }
}

#[derive(Clone)]
pub struct WebhookReconciler {
    payments: Arc<PaymentOrchestrator>,
    secrets: WebhookSecrets,
}

impl WebhookReconciler {
    pub fn new(payments: Arc<PaymentOrchestrator>, secrets: WebhookSecrets) -> Self {
        Self { payments, secrets }
    }

    /// Handle a card-rail notification.
    ///
    /// Only `payment_intent.succeeded` is acted on; it runs the same
    /// confirmation as the synchronous path.
    pub async fn handle_card_webhook(
        &self,
        payload: &str,
        signature: &str,
    ) -> BillingResult<WebhookOutcome> {
        verify_card_signature(
            payload,
            signature,
            &self.secrets.card,
            OffsetDateTime::now_utc(),
        )?;

        let event: CardEvent = match serde_json::from_str(payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(error = %e, "Failed to parse card webhook event");
                return Ok(WebhookOutcome::Failed(format!("unparseable event: {e}")));
            }
        };

        if event.type_ != CARD_SUCCEEDED {
            tracing::debug!(
                event_id = %event.id,
                event_type = %event.type_,
                "Ignoring card event"
            );
            return Ok(WebhookOutcome::Ignored(event.type_));
        }

        let intent_id = event.data.object.id;
        tracing::info!(
            event_id = %event.id,
            payment_intent_id = %intent_id,
            "Card payment succeeded"
        );
        Ok(self.outcome(
            "card",
            &intent_id,
            self.payments.confirm_card_payment(&intent_id, None).await,
        ))
    }

    /// Handle an async-rail notification; acts only on approved payments
    pub async fn handle_async_webhook(
        &self,
        payload: &str,
        signature: &str,
        request_id: &str,
    ) -> BillingResult<WebhookOutcome> {
        let notification: AsyncNotification = serde_json::from_str(payload).map_err(|e| {
            tracing::warn!(error = %e, "Unparseable async webhook body");
            BillingError::WebhookPayload(e.to_string())
        })?;
        let payment_id = notification
            .data
            .payment_id()
            .ok_or_else(|| BillingError::WebhookPayload("data.id missing".to_string()))?;

        verify_async_signature(&payment_id, request_id, signature, &self.secrets.async_rail)?;

        if notification.type_.as_deref() != Some("payment") {
            return Ok(WebhookOutcome::Ignored(
                notification.type_.unwrap_or_else(|| "untyped".to_string()),
            ));
        }
        match notification.data.status.as_deref() {
            Some("approved") => {}
            other => {
                let status = other.unwrap_or("missing");
                tracing::debug!(
                    payment_id = %payment_id,
                    status,
                    "Ignoring async payment"
                );
                return Ok(WebhookOutcome::Ignored(format!("status {status}")));
            }
        }

        Ok(self.outcome(
            "async",
            &payment_id,
            self.payments.confirm_async_payment(&payment_id).await,
        ))
    }

    fn outcome(
        &self,
        rail: &'static str,
        reference: &str,
        result: BillingResult<Subscription>,
    ) -> WebhookOutcome {
        match result {
            Ok(subscription) => WebhookOutcome::Applied(Box::new(subscription)),
            Err(e) => {
                tracing::error!(
                    rail,
                    reference,
                    error = %e,
                    "Webhook reconciliation failed, acknowledging anyway"
                );
                WebhookOutcome::Failed(e.to_string())
            }
        }
    }
}
