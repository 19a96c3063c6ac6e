//! Billing errors

use thiserror::Error;
use vendeai_shared::StoreError;

pub type BillingResult<T> = Result<T, BillingError>;

/// Caller-facing category of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad credentials or expired session; the user must log in again
    Authentication,
    /// Plan does not allow the action; the user must upgrade
    Authorization,
    /// Malformed input; reject without retry
    Validation,
    /// A payment or AI provider failed; try again later
    UpstreamProvider,
    Conflict,
    NotFound,
    /// Storage or integrity failure; abort the operation
    Fatal,
}

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Invalid payment reference: {0}")]
    InvalidReference(String),

    #[error("Payment not successful: {0}")]
    PaymentNotSuccessful(String),

    #[error("Payment expired: {0}")]
    Expired(String),

    #[error("Subscription not found for user {0}")]
    SubscriptionNotFound(String),

    #[error("Payment belongs to another user")]
    PaymentOwnerMismatch,

    #[error("Webhook signature invalid")]
    WebhookSignatureInvalid,

    #[error("Webhook payload invalid: {0}")]
    WebhookPayload(String),

    /// Transport failure, timeout or provider 5xx; safe to retry reads
    #[error("Payment provider unavailable: {0}")]
    Upstream(String),

    /// Provider answered but refused the request or returned unusable data
    #[error("Payment provider rejected request: {0}")]
    UpstreamRejected(String),

    #[error("Billing not configured: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl BillingError {
    pub fn class(&self) -> ErrorClass {
        match self {
            BillingError::InvalidPlan(_)
            | BillingError::InvalidReference(_)
            | BillingError::PaymentNotSuccessful(_)
            | BillingError::Expired(_)
            | BillingError::WebhookSignatureInvalid
            | BillingError::WebhookPayload(_) => ErrorClass::Validation,
            BillingError::PaymentOwnerMismatch => ErrorClass::Authorization,
            BillingError::SubscriptionNotFound(_) => ErrorClass::NotFound,
            BillingError::Upstream(_) | BillingError::UpstreamRejected(_) => {
                ErrorClass::UpstreamProvider
            }
            BillingError::Config(_) => ErrorClass::Fatal,
            BillingError::Store(StoreError::NotFound(_)) => ErrorClass::NotFound,
            BillingError::Store(StoreError::Conflict(_)) => ErrorClass::Conflict,
            BillingError::Store(_) => ErrorClass::Fatal,
        }
    }

    /// Whether an idempotent read may be attempted again
    pub fn is_retryable(&self) -> bool {
        matches!(self, BillingError::Upstream(_))
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(e: stripe::StripeError) -> Self {
        match e {
            stripe::StripeError::Stripe(req) => {
                let status = req.http_status;
                let message = req.message.unwrap_or_else(|| "unknown".to_string());
                if status >= 500 {
                    BillingError::Upstream(format!("stripe {status}: {message}"))
                } else {
                    BillingError::UpstreamRejected(format!("stripe {status}: {message}"))
                }
            }
            other => BillingError::Upstream(format!("stripe: {other}")),
        }
    }
}

impl From<reqwest::Error> for BillingError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) if status.is_client_error() => {
                BillingError::UpstreamRejected(format!("mercadopago {status}: {e}"))
            }
            _ => BillingError::Upstream(format!("mercadopago: {e}")),
        }
    }
}
