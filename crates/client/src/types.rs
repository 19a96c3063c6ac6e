//! Response bodies of the VendeAI API as the client reads them

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use vendeai_shared::{Capability, PlanId, Principal, RemainingUses, Subscription};

/// Why the principal has the plan it has
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanState {
    Free,
    Active,
    CanceledGrace,
    Canceled,
}

/// Server-computed plan and quota snapshot
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementView {
    pub plan_id: PlanId,
    pub plan_name: String,
    pub state: PlanState,
    pub ai_uses: u32,
    pub remaining_ai_uses: RemainingUses,
    pub max_products: Option<u32>,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub period_end: Option<OffsetDateTime>,
}

impl EntitlementView {
    pub fn can_use_ai(&self) -> bool {
        !self.remaining_ai_uses.is_exhausted()
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct AuthResponse {
    pub user: Principal,
    pub token: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct Credentials<'a> {
    pub email: &'a str,
    pub password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PlanRequest {
    pub plan_id: PlanId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConfirmCardRequest<'a> {
    pub payment_intent_id: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AiUseResponse {
    pub allowed: bool,
    pub remaining: RemainingUses,
}

/// Result of a quota-gated AI action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiUseOutcome {
    /// The action may run; `remaining` is what the server reported
    Allowed { remaining: RemainingUses },
    /// Quota is exhausted; show the upgrade prompt
    UpgradeRequired,
}

/// Card payment intent for the card SDK to confirm
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardIntent {
    pub client_secret: String,
    pub payment_intent_id: String,
}

/// PIX payment the user pays by scanning the QR code
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsyncPayment {
    pub payment_id: String,
    pub qr_code: Option<String>,
    pub qr_code_base64: Option<String>,
    pub external_reference: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expiration_date: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsyncPaymentStatus {
    pub status: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub approved_date: Option<OffsetDateTime>,
    pub subscription: Option<Subscription>,
}

impl AsyncPaymentStatus {
    pub fn is_approved(&self) -> bool {
        self.status == "approved"
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct SubscriptionEnvelope {
    pub subscription: Option<Subscription>,
}
