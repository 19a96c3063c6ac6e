// Billing crate clippy configuration
#![allow(clippy::result_large_err)] // BillingError carries provider messages
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! VendeAI Billing Module
//!
//! Entitlements, AI-usage quota and the two payment rails.
//!
//! ## Features
//!
//! - **Entitlement Resolver**: effective plan, capabilities and remaining AI uses
//! - **Quota Guard**: atomic check-and-increment of the AI-usage counter
//! - **Card Rail**: Stripe payment intents (create, confirm, cancel)
//! - **Async Rail**: Mercado Pago PIX payments with expiry
//! - **Webhooks**: signed notifications from both providers, applied idempotently

pub mod client;
pub mod entitlement;
pub mod error;
pub mod mercadopago;
pub mod payments;
pub mod prices;
pub mod quota;
pub mod reference;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod upstream;
pub mod webhooks;

#[cfg(test)]
mod edge_case_tests;

use std::sync::Arc;

use vendeai_shared::Store;

// Client
pub use client::{CardGateway, CardIntent, CardIntentState, StripeClient, StripeConfig};

// Entitlement
pub use entitlement::{compute_entitlement, Entitlement, EntitlementResolver, EntitlementState};

// Error
pub use error::{BillingError, BillingResult, ErrorClass};

// Async rail
pub use mercadopago::{
    AsyncGateway, AsyncPayment, AsyncPaymentStatus, MercadoPagoClient, MercadoPagoConfig,
};

// Payments
pub use payments::{
    AsyncPaymentCreated, AsyncPaymentPoll, CardIntentCreated, PaymentOrchestrator, BILLING_PERIOD,
};

// Quota
pub use quota::{AiUseDecision, QuotaGuard};

// Reference
pub use reference::ExternalReference;

// Upstream
pub use upstream::UpstreamPolicy;

// Webhooks
pub use webhooks::{WebhookOutcome, WebhookReconciler, WebhookSecrets};

/// Provider configuration for both rails
#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub stripe: StripeConfig,
    pub mercadopago: MercadoPagoConfig,
    pub policy: UpstreamPolicy,
}

impl BillingConfig {
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self {
            stripe: StripeConfig::from_env()?,
            mercadopago: MercadoPagoConfig::from_env()?,
            policy: UpstreamPolicy::default(),
        })
    }
}

/// Payment orchestration plus webhook reconciliation
#[derive(Clone)]
pub struct BillingService {
    pub payments: Arc<PaymentOrchestrator>,
    pub webhooks: WebhookReconciler,
}

impl BillingService {
    /// Wire the real Stripe and Mercado Pago clients
    pub fn new(store: Arc<dyn Store>, config: BillingConfig) -> Self {
        let secrets = WebhookSecrets {
            card: config.stripe.webhook_secret.clone(),
            async_rail: config.mercadopago.webhook_secret.clone(),
        };
        let ttl = config.mercadopago.payment_ttl();
        Self::with_gateways(
            store,
            Arc::new(StripeClient::new(config.stripe)),
            Arc::new(MercadoPagoClient::new(config.mercadopago)),
            secrets,
            config.policy,
            ttl,
        )
    }

    /// Wire arbitrary gateways, such as the in-memory fakes used by tests
    pub fn with_gateways(
        store: Arc<dyn Store>,
        card: Arc<dyn CardGateway>,
        pix: Arc<dyn AsyncGateway>,
        secrets: WebhookSecrets,
        policy: UpstreamPolicy,
        async_ttl: time::Duration,
    ) -> Self {
        let payments = Arc::new(PaymentOrchestrator::new(store, card, pix, policy, async_ttl));
        let webhooks = WebhookReconciler::new(payments.clone(), secrets);
        Self { payments, webhooks }
    }
}
