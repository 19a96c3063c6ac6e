//! Card rail: Stripe client and the gateway seam the orchestrator talks to

use std::collections::HashMap;

use async_trait::async_trait;
use stripe::{
    CancelPaymentIntent, Client, CreatePaymentIntent, CreatePaymentIntentAutomaticPaymentMethods,
    Currency, PaymentIntent, PaymentIntentId, PaymentIntentStatus,
};

use crate::error::{BillingError, BillingResult};

/// Stripe configuration
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
}

impl StripeConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self {
            secret_key: std::env::var("STRIPE_SECRET_KEY")
                .map_err(|_| BillingError::Config("STRIPE_SECRET_KEY not set".to_string()))?,
            webhook_secret: std::env::var("STRIPE_WEBHOOK_SECRET")
                .map_err(|_| BillingError::Config("STRIPE_WEBHOOK_SECRET not set".to_string()))?,
        })
    }
}

/// Card intent lifecycle as seen by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardIntentState {
    Created,
    AwaitingConfirmation,
    Succeeded,
    Failed,
}

impl CardIntentState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CardIntentState::Succeeded | CardIntentState::Failed)
    }
}

impl From<PaymentIntentStatus> for CardIntentState {
    fn from(status: PaymentIntentStatus) -> Self {
        match status {
            PaymentIntentStatus::RequiresPaymentMethod => CardIntentState::Created,
            PaymentIntentStatus::RequiresConfirmation
            | PaymentIntentStatus::RequiresAction
            | PaymentIntentStatus::RequiresCapture
            | PaymentIntentStatus::Processing => CardIntentState::AwaitingConfirmation,
            PaymentIntentStatus::Succeeded => CardIntentState::Succeeded,
            PaymentIntentStatus::Canceled => CardIntentState::Failed,
        }
    }
}

/// Provider-neutral view of a card payment intent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardIntent {
    pub id: String,
    pub client_secret: Option<String>,
    pub amount_cents: i64,
    pub state: CardIntentState,
    pub metadata: HashMap<String, String>,
}

/// Card payment provider
#[async_trait]
pub trait CardGateway: Send + Sync {
    async fn create_intent(
        &self,
        amount_cents: i64,
        metadata: HashMap<String, String>,
    ) -> BillingResult<CardIntent>;

    async fn retrieve_intent(&self, intent_id: &str) -> BillingResult<CardIntent>;

    async fn cancel_intent(&self, intent_id: &str) -> BillingResult<()>;
}

/// Stripe client wrapper
#[derive(Clone)]
pub struct StripeClient {
    inner: Client,
    config: StripeConfig,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        let inner = Client::new(&config.secret_key);
        Self { inner, config }
    }

    pub fn inner(&self) -> &Client {
        &self.inner
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}

fn parse_intent_id(intent_id: &str) -> BillingResult<PaymentIntentId> {
    intent_id.parse::<PaymentIntentId>().map_err(|_| {
        BillingError::InvalidReference(format!("not a payment intent id: {intent_id}"))
    })
}

impl From<PaymentIntent> for CardIntent {
    fn from(intent: PaymentIntent) -> Self {
        Self {
            id: intent.id.to_string(),
            client_secret: intent.client_secret,
            amount_cents: intent.amount,
            state: intent.status.into(),
            metadata: intent.metadata,
        }
    }
}

#[async_trait]
impl CardGateway for StripeClient {
    async fn create_intent(
        &self,
        amount_cents: i64,
        metadata: HashMap<String, String>,
    ) -> BillingResult<CardIntent> {
        let mut params = CreatePaymentIntent::new(amount_cents, Currency::BRL);
        params.metadata = Some(metadata);
        params.automatic_payment_methods = Some(CreatePaymentIntentAutomaticPaymentMethods {
            enabled: true,
            allow_redirects: None,
        });

        let intent = PaymentIntent::create(&self.inner, params).await?;
        tracing::debug!(intent_id = %intent.id, amount_cents, "Created Stripe payment intent");
        Ok(intent.into())
    }

    async fn retrieve_intent(&self, intent_id: &str) -> BillingResult<CardIntent> {
        let id = parse_intent_id(intent_id)?;
        let intent = PaymentIntent::retrieve(&self.inner, &id, &[]).await?;
        Ok(intent.into())
    }

    async fn cancel_intent(&self, intent_id: &str) -> BillingResult<()> {
        let id = parse_intent_id(intent_id)?;
        PaymentIntent::cancel(&self.inner, &id, CancelPaymentIntent::default()).await?;
        tracing::debug!(intent_id = %id, "Canceled Stripe payment intent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_intent_state_mapping() {
        assert_eq!(
            CardIntentState::from(PaymentIntentStatus::RequiresPaymentMethod),
            CardIntentState::Created
        );
        assert_eq!(
            CardIntentState::from(PaymentIntentStatus::Processing),
            CardIntentState::AwaitingConfirmation
        );
        assert_eq!(
            CardIntentState::from(PaymentIntentStatus::Succeeded),
            CardIntentState::Succeeded
        );
        assert!(CardIntentState::from(PaymentIntentStatus::Canceled).is_terminal());
        assert!(!CardIntentState::Created.is_terminal());
    }

    #[test]
    fn test_rejects_malformed_intent_id() {
        assert!(matches!(
            parse_intent_id("not-an-id"),
            Err(BillingError::InvalidReference(_))
        ));
        assert!(parse_intent_id("pi_3Mtw1xLkdIwHu7ix0DR8p6tc").is_ok());
    }

    #[test]
    #[serial]
    fn test_config_requires_secrets() {
        std::env::remove_var("STRIPE_SECRET_KEY");
        std::env::remove_var("STRIPE_WEBHOOK_SECRET");
        assert!(matches!(
            StripeConfig::from_env(),
            Err(BillingError::Config(_))
        ));

        std::env::set_var("STRIPE_SECRET_KEY", "sk_test_123");
        std::env::set_var("STRIPE_WEBHOOK_SECRET", "whsec_abc");
        let config = StripeConfig::from_env().unwrap();
        assert_eq!(config.secret_key, "sk_test_123");
        assert_eq!(config.webhook_secret, "whsec_abc");

        std::env::remove_var("STRIPE_SECRET_KEY");
        std::env::remove_var("STRIPE_WEBHOOK_SECRET");
    }
}
