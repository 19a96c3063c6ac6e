//! Domain records shared by the api, billing and client crates

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::plans::PlanId;

/// OAuth identity providers accepted at login
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OAuthProvider {
    Google,
    Facebook,
}

impl OAuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthProvider::Google => "google",
            OAuthProvider::Facebook => "facebook",
        }
    }
}

impl fmt::Display for OAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OAuthProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "google" => Ok(OAuthProvider::Google),
            "facebook" => Ok(OAuthProvider::Facebook),
            other => Err(format!("unsupported oauth provider: {other}")),
        }
    }
}

/// UI language of a principal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    Pt,
    En,
    Es,
}

impl Locale {
    pub fn as_str(&self) -> &'static str {
        match self {
            Locale::Pt => "pt",
            Locale::En => "en",
            Locale::Es => "es",
        }
    }
}

impl FromStr for Locale {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pt" => Ok(Locale::Pt),
            "en" => Ok(Locale::En),
            "es" => Ok(Locale::Es),
            other => Err(format!("unsupported locale: {other}")),
        }
    }
}

/// An authenticated user identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub avatar: Option<String>,
    pub locale: Locale,
    /// Argon2 PHC string, absent for OAuth-only accounts
    #[serde(skip_serializing, default)]
    pub password_hash: Option<String>,
    pub oauth_provider: Option<OAuthProvider>,
    #[serde(skip_serializing, default)]
    pub oauth_provider_id: Option<String>,
    pub email_verified: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Principal {
    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }
}

/// Input for creating a principal
#[derive(Debug, Clone)]
pub struct NewPrincipal {
    pub email: String,
    pub name: String,
    pub avatar: Option<String>,
    pub password_hash: Option<String>,
    pub oauth: Option<(OAuthProvider, String)>,
    pub email_verified: bool,
}

/// Partial profile edit; `None` leaves the field unchanged
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub locale: Option<Locale>,
}

/// Server-side record of an issued bearer credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// JWT id, the lookup key of the session row
    pub token_id: String,
    pub user_id: Uuid,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

impl Session {
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SubscriptionStatus {
    Active,
    Canceled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Canceled => "canceled",
        }
    }
}

impl FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" | "ACTIVE" => Ok(SubscriptionStatus::Active),
            "canceled" | "CANCELED" => Ok(SubscriptionStatus::Canceled),
            other => Err(format!("unknown subscription status: {other}")),
        }
    }
}

/// Payment rail that produced a confirmed payment, carrying the provider reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "rail", content = "reference", rename_all = "lowercase")]
pub enum PaymentRail {
    /// Card payment intent id
    Card(String),
    /// Async/QR payment id
    Async(String),
}

impl PaymentRail {
    pub fn name(&self) -> &'static str {
        match self {
            PaymentRail::Card(_) => "card",
            PaymentRail::Async(_) => "async",
        }
    }

    pub fn reference(&self) -> &str {
        match self {
            PaymentRail::Card(r) | PaymentRail::Async(r) => r,
        }
    }
}

/// Per-principal subscription; at most one exists per principal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Raw stored plan id; may name a plan the catalog has since dropped
    pub plan_id: String,
    pub status: SubscriptionStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub current_period_start: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub current_period_end: Option<OffsetDateTime>,
    pub card_payment_ref: Option<String>,
    pub async_payment_ref: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub canceled_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Subscription {
    /// Subscription given to every new principal
    pub fn free(user_id: Uuid, now: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            plan_id: PlanId::Free.as_str().to_string(),
            status: SubscriptionStatus::Active,
            current_period_start: None,
            current_period_end: None,
            card_payment_ref: None,
            async_payment_ref: None,
            canceled_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The rail reference on file, if any
    pub fn payment_rail(&self) -> Option<PaymentRail> {
        match (&self.card_payment_ref, &self.async_payment_ref) {
            (Some(card), _) => Some(PaymentRail::Card(card.clone())),
            (None, Some(pix)) => Some(PaymentRail::Async(pix.clone())),
            (None, None) => None,
        }
    }
}

/// A confirmed payment ready to be committed to a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedPayment {
    pub user_id: Uuid,
    pub plan_id: PlanId,
    pub rail: PaymentRail,
    pub period_start: OffsetDateTime,
    pub period_end: OffsetDateTime,
}

/// Outcome of committing a confirmed payment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentApplication {
    pub subscription: Subscription,
    /// False when this rail reference had already been applied
    pub applied: bool,
}
