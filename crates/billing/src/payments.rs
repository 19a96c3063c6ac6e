//! Payment intent orchestration across the card and async/QR rails
//!
//! Both rails end in [`PaymentOrchestrator::apply_confirmed_payment`], the only
//! place a subscription changes because of a payment.
//!
//! Card rail: `created -> awaiting_confirmation -> {succeeded, failed}`.
//! Async rail: `created -> pending -> {approved, other}`, bounded by a provider
//! expiry.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;
use vendeai_shared::{ConfirmedPayment, PaymentRail, PlanId, Store, StoreError, Subscription};

use crate::client::{CardGateway, CardIntentState};
use crate::error::{BillingError, BillingResult};
use crate::mercadopago::{AsyncGateway, AsyncPayment, AsyncPaymentRequest, AsyncPaymentStatus};
use crate::prices::{async_price, card_price, purchasable_plan};
use crate::reference::ExternalReference;
use crate::upstream::UpstreamPolicy;

/// Length of the period bought by one payment
pub const BILLING_PERIOD: Duration = Duration::days(30);

const META_USER_ID: &str = "user_id";
const META_PLAN_ID: &str = "plan_id";
const META_TYPE: &str = "type";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardIntentCreated {
    pub client_secret: String,
    pub payment_intent_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AsyncPaymentCreated {
    pub payment_id: String,
    pub qr_code: Option<String>,
    pub qr_code_base64: Option<String>,
    pub external_reference: String,
    #[serde(rename = "expirationDate", with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// Result of a client-side status poll on an async payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AsyncPaymentPoll {
    pub status: &'static str,
    #[serde(rename = "approvedDate", with = "time::serde::rfc3339::option")]
    pub approved_at: Option<OffsetDateTime>,
    /// Present once an approved payment has been applied
    pub subscription: Option<Subscription>,
}

pub struct PaymentOrchestrator {
    store: Arc<dyn Store>,
    card: Arc<dyn CardGateway>,
    pix: Arc<dyn AsyncGateway>,
    policy: UpstreamPolicy,
    async_ttl: Duration,
}

impl PaymentOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        card: Arc<dyn CardGateway>,
        pix: Arc<dyn AsyncGateway>,
        policy: UpstreamPolicy,
        async_ttl: Duration,
    ) -> Self {
        Self {
            store,
            card,
            pix,
            policy,
            async_ttl,
        }
    }

    // ========================================================================
    // Card rail
    // ========================================================================

    /// Create a card payment intent for a paid plan
    pub async fn create_card_intent(
        &self,
        user_id: Uuid,
        plan_id: &str,
    ) -> BillingResult<CardIntentCreated> {
        let plan = purchasable_plan(plan_id)?;
        let price = card_price(plan)?;

        let metadata = HashMap::from([
            (META_USER_ID.to_string(), user_id.to_string()),
            (META_PLAN_ID.to_string(), plan.as_str().to_string()),
            (META_TYPE.to_string(), "subscription".to_string()),
        ]);

        let intent = self
            .policy
            .call(
                "card.create_intent",
                self.card.create_intent(price.monthly_cents, metadata),
            )
            .await?;

        let client_secret = intent.client_secret.ok_or_else(|| {
            BillingError::UpstreamRejected(format!("intent {} has no client secret", intent.id))
        })?;

        tracing::info!(
            user_id = %user_id,
            plan_id = %plan,
            payment_intent_id = %intent.id,
            amount_cents = price.monthly_cents,
            "Card payment intent created"
        );

        Ok(CardIntentCreated {
            client_secret,
            payment_intent_id: intent.id,
        })
    }

    /// Re-fetch a card intent and, when it succeeded, apply it.
    ///
    /// `caller` restricts confirmation to the principal named in the intent
    /// metadata; the webhook path passes `None`.
    pub async fn confirm_card_payment(
        &self,
        payment_intent_id: &str,
        caller: Option<Uuid>,
    ) -> BillingResult<Subscription> {
        let intent = self
            .policy
            .read("card.retrieve_intent", || {
                self.card.retrieve_intent(payment_intent_id)
            })
            .await?;

        let (user_id, plan) = decode_card_metadata(&intent.metadata, payment_intent_id)?;
        if let Some(caller) = caller {
            if caller != user_id {
                tracing::warn!(
                    caller = %caller,
                    owner = %user_id,
                    payment_intent_id,
                    "Card confirmation attempted by another principal"
                );
                return Err(BillingError::PaymentOwnerMismatch);
            }
        }

        if intent.state != CardIntentState::Succeeded {
            return Err(BillingError::PaymentNotSuccessful(format!(
                "intent {payment_intent_id} is {:?}",
                intent.state
            )));
        }

        self.apply_confirmed_payment(
            user_id,
            plan,
            PaymentRail::Card(payment_intent_id.to_string()),
        )
        .await
    }

    // ========================================================================
    // Async/QR rail
    // ========================================================================

    /// Create a PIX payment whose external reference carries principal and plan
    pub async fn create_async_payment(
        &self,
        user_id: Uuid,
        plan_id: &str,
    ) -> BillingResult<AsyncPaymentCreated> {
        let plan = purchasable_plan(plan_id)?;
        let price = async_price(plan)?;

        let principal = self
            .store
            .find_principal(user_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("user {user_id}")))?;

        let now = OffsetDateTime::now_utc();
        let reference = ExternalReference::new(user_id, plan, now).encode();
        let expires_at = now + self.async_ttl;

        let payment = self
            .policy
            .call(
                "async.create_payment",
                self.pix.create_payment(AsyncPaymentRequest {
                    amount_cents: price.monthly_cents,
                    description: format!("Plano {} VendeAI", plan.as_str().to_uppercase()),
                    payer_email: principal.email,
                    external_reference: reference.clone(),
                    expires_at,
                }),
            )
            .await?;

        tracing::info!(
            user_id = %user_id,
            plan_id = %plan,
            payment_id = %payment.id,
            external_reference = %reference,
            "PIX payment created"
        );

        Ok(AsyncPaymentCreated {
            payment_id: payment.id,
            qr_code: payment.qr_code,
            qr_code_base64: payment.qr_code_base64,
            external_reference: reference,
            expires_at: payment.expires_at.unwrap_or(expires_at),
        })
    }

    /// Re-fetch an async payment and, when approved in time, apply it
    pub async fn confirm_async_payment(&self, payment_id: &str) -> BillingResult<Subscription> {
        let payment = self.fetch_async_payment(payment_id).await?;
        self.apply_async_payment(&payment, OffsetDateTime::now_utc())
            .await
    }

    /// Status poll for the principal that created the payment.
    ///
    /// An approved payment is applied on the spot; the webhook may already
    /// have done so, in which case the apply is a no-op.
    pub async fn poll_async_payment(
        &self,
        user_id: Uuid,
        payment_id: &str,
    ) -> BillingResult<AsyncPaymentPoll> {
        let payment = self.fetch_async_payment(payment_id).await?;

        let owner = payment
            .external_reference
            .as_deref()
            .map(ExternalReference::decode)
            .transpose()?;
        if owner.map(|r| r.user_id) != Some(user_id) {
            return Err(BillingError::PaymentOwnerMismatch);
        }

        let subscription = match payment.status {
            AsyncPaymentStatus::Approved => Some(
                self.apply_async_payment(&payment, OffsetDateTime::now_utc())
                    .await?,
            ),
            _ => None,
        };

        Ok(AsyncPaymentPoll {
            status: payment.status.as_str(),
            approved_at: payment.approved_at,
            subscription,
        })
    }

    async fn fetch_async_payment(&self, payment_id: &str) -> BillingResult<AsyncPayment> {
        self.policy
            .read("async.get_payment", || self.pix.get_payment(payment_id))
            .await
    }

    async fn apply_async_payment(
        &self,
        payment: &AsyncPayment,
        now: OffsetDateTime,
    ) -> BillingResult<Subscription> {
        check_async_payment(payment, now)?;

        let raw = payment.external_reference.as_deref().ok_or_else(|| {
            BillingError::InvalidReference(format!("payment {} has no reference", payment.id))
        })?;
        let reference = ExternalReference::decode(raw)?;

        self.apply_confirmed_payment(
            reference.user_id,
            reference.plan_id,
            PaymentRail::Async(payment.id.clone()),
        )
        .await
    }

    // ========================================================================
    // Subscription
    // ========================================================================

    /// Cancel the principal's subscription.
    ///
    /// A card intent on file is canceled upstream on a best-effort basis; the
    /// local transition commits whether or not that succeeds.
    pub async fn cancel_subscription(&self, user_id: Uuid) -> BillingResult<Subscription> {
        let existing = self
            .store
            .get_subscription(user_id)
            .await?
            .ok_or_else(|| BillingError::SubscriptionNotFound(user_id.to_string()))?;

        if let Some(intent_id) = existing.card_payment_ref.as_deref() {
            let upstream = self
                .policy
                .call("card.cancel_intent", self.card.cancel_intent(intent_id))
                .await;
            if let Err(e) = upstream {
                tracing::warn!(
                    user_id = %user_id,
                    payment_intent_id = intent_id,
                    error = %e,
                    "Upstream card intent cancel failed, canceling locally"
                );
            }
        }

        let canceled = self
            .store
            .cancel_subscription(user_id, OffsetDateTime::now_utc())
            .await?
            .ok_or_else(|| BillingError::SubscriptionNotFound(user_id.to_string()))?;

        tracing::info!(user_id = %user_id, plan_id = %canceled.plan_id, "Subscription canceled");
        Ok(canceled)
    }

    pub async fn get_subscription_status(
        &self,
        user_id: Uuid,
    ) -> BillingResult<Option<Subscription>> {
        Ok(self.store.get_subscription(user_id).await?)
    }

    /// Commit a confirmed payment to the principal's subscription.
    ///
    /// Upserts by principal: plan, ACTIVE, a fresh 30-day period and the rail
    /// reference, resetting the AI-usage counter in the same store operation.
    /// A reference that was already applied returns the stored subscription
    /// unchanged.
    pub async fn apply_confirmed_payment(
        &self,
        user_id: Uuid,
        plan_id: PlanId,
        rail: PaymentRail,
    ) -> BillingResult<Subscription> {
        if !plan_id.is_paid() {
            return Err(BillingError::InvalidPlan(plan_id.to_string()));
        }
        if self.store.find_principal(user_id).await?.is_none() {
            return Err(BillingError::InvalidReference(format!(
                "payment names unknown principal {user_id}"
            )));
        }

        let now = OffsetDateTime::now_utc();
        let application = self
            .store
            .apply_payment(&ConfirmedPayment {
                user_id,
                plan_id,
                rail: rail.clone(),
                period_start: now,
                period_end: now + BILLING_PERIOD,
            })
            .await?;

        if application.applied {
            tracing::info!(
                user_id = %user_id,
                plan_id = %plan_id,
                rail = rail.name(),
                reference = rail.reference(),
                "Payment applied to subscription"
            );
        } else {
            tracing::info!(
                user_id = %user_id,
                rail = rail.name(),
                reference = rail.reference(),
                "Payment already applied, skipping"
            );
        }

        Ok(application.subscription)
    }
}

fn decode_card_metadata(
    metadata: &HashMap<String, String>,
    intent_id: &str,
) -> BillingResult<(Uuid, PlanId)> {
    let invalid =
        |what: &str| BillingError::InvalidReference(format!("intent {intent_id}: {what}"));

    let user_id = metadata
        .get(META_USER_ID)
        .and_then(|raw| Uuid::parse_str(raw).ok())
        .ok_or_else(|| invalid("missing or malformed user_id"))?;
    let plan = metadata
        .get(META_PLAN_ID)
        .and_then(|raw| purchasable_plan(raw).ok())
        .ok_or_else(|| invalid("missing or unpurchasable plan_id"))?;

    Ok((user_id, plan))
}

/// Terminal-state and expiry checks for an async payment
fn check_async_payment(payment: &AsyncPayment, now: OffsetDateTime) -> BillingResult<()> {
    match payment.status {
        AsyncPaymentStatus::Approved => match (payment.approved_at, payment.expires_at) {
            (Some(approved), Some(expires)) if approved > expires => Err(BillingError::Expired(
                format!("payment {} approved after expiry", payment.id),
            )),
            _ => Ok(()),
        },
        _ => match payment.expires_at {
            Some(expires) if now > expires => Err(BillingError::Expired(format!(
                "payment {} expired at {expires}",
                payment.id
            ))),
            _ => Err(BillingError::PaymentNotSuccessful(format!(
                "payment {} is {}",
                payment.id,
                payment.status.as_str()
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn payment(
        status: AsyncPaymentStatus,
        expires_at: Option<OffsetDateTime>,
        approved_at: Option<OffsetDateTime>,
    ) -> AsyncPayment {
        AsyncPayment {
            id: "9001".to_string(),
            status,
            external_reference: None,
            qr_code: None,
            qr_code_base64: None,
            expires_at,
            approved_at,
        }
    }

    #[test]
    fn test_async_expiry_rules() {
        let expires = datetime!(2025-01-01 12:30 UTC);
        let before = datetime!(2025-01-01 12:00 UTC);
        let after = datetime!(2025-01-01 13:00 UTC);

        assert!(check_async_payment(
            &payment(AsyncPaymentStatus::Approved, Some(expires), Some(before)),
            after
        )
        .is_ok());
        assert!(matches!(
            check_async_payment(
                &payment(AsyncPaymentStatus::Approved, Some(expires), Some(after)),
                after
            ),
            Err(BillingError::Expired(_))
        ));
        assert!(matches!(
            check_async_payment(&payment(AsyncPaymentStatus::Pending, Some(expires), None), after),
            Err(BillingError::Expired(_))
        ));
        assert!(matches!(
            check_async_payment(&payment(AsyncPaymentStatus::Pending, Some(expires), None), before),
            Err(BillingError::PaymentNotSuccessful(_))
        ));
        assert!(matches!(
            check_async_payment(&payment(AsyncPaymentStatus::Other, None, None), before),
            Err(BillingError::PaymentNotSuccessful(_))
        ));
    }

    #[test]
    fn test_card_metadata_decoding() {
        let user_id = Uuid::new_v4();
        let good = HashMap::from([
            (META_USER_ID.to_string(), user_id.to_string()),
            (META_PLAN_ID.to_string(), "pro".to_string()),
        ]);
        assert_eq!(
            decode_card_metadata(&good, "pi_1").unwrap(),
            (user_id, PlanId::Pro)
        );

        let free = HashMap::from([
            (META_USER_ID.to_string(), user_id.to_string()),
            (META_PLAN_ID.to_string(), "free".to_string()),
        ]);
        assert!(matches!(
            decode_card_metadata(&free, "pi_1"),
            Err(BillingError::InvalidReference(_))
        ));
        assert!(matches!(
            decode_card_metadata(&HashMap::new(), "pi_1"),
            Err(BillingError::InvalidReference(_))
        ));
    }
}
