// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for Billing System
//!
//! End-to-end behaviour of entitlement, quota and both payment rails over the
//! in-memory store and fake gateways:
//! - Entitlement after registration and after payment
//! - Quota exhaustion and concurrent attempts
//! - Card confirmation idempotence and ownership
//! - Async payments, expiry and reference decoding
//! - Webhook authenticity, acknowledgement and replay
//! - Cancellation

use std::sync::Arc;
use std::time::Duration as StdDuration;

use time::{Duration, OffsetDateTime};
use uuid::Uuid;
use vendeai_shared::{
    MemoryStore, NewPrincipal, PlanId, RemainingUses, Store, SubscriptionStatus,
};

use crate::client::CardIntentState;
use crate::entitlement::EntitlementResolver;
use crate::error::BillingError;
use crate::mercadopago::{AsyncPayment, AsyncPaymentStatus};
use crate::quota::{AiUseDecision, QuotaGuard};
use crate::reference::ExternalReference;
use crate::testing::{
    sign_async_notification, sign_card_payload, FakeAsyncGateway, FakeCardGateway,
};
use crate::upstream::UpstreamPolicy;
use crate::webhooks::{compute_signature, WebhookOutcome, WebhookSecrets};
use crate::BillingService;

const CARD_SECRET: &str = "whsec_edge_case";
const ASYNC_SECRET: &str = "mp_edge_case";

struct Harness {
    store: Arc<MemoryStore>,
    card: Arc<FakeCardGateway>,
    pix: Arc<FakeAsyncGateway>,
    billing: BillingService,
    quota: QuotaGuard,
    entitlement: EntitlementResolver,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let card = Arc::new(FakeCardGateway::new());
    let pix = Arc::new(FakeAsyncGateway::new());
    let policy = UpstreamPolicy {
        timeout: StdDuration::from_secs(2),
        read_retries: 1,
        retry_delay: StdDuration::from_millis(1),
    };
    let billing = BillingService::with_gateways(
        store.clone(),
        card.clone(),
        pix.clone(),
        WebhookSecrets {
            card: CARD_SECRET.to_string(),
            async_rail: ASYNC_SECRET.to_string(),
        },
        policy,
        Duration::minutes(30),
    );
    Harness {
        quota: QuotaGuard::new(store.clone()),
        entitlement: EntitlementResolver::new(store.clone()),
        store,
        card,
        pix,
        billing,
    }
}

impl Harness {
    async fn register(&self, email: &str) -> Uuid {
        self.store
            .create_principal(NewPrincipal {
                email: email.to_string(),
                name: "Edge Case".to_string(),
                avatar: None,
                password_hash: Some("$argon2id$placeholder".to_string()),
                oauth: None,
                email_verified: false,
            })
            .await
            .unwrap()
            .id
    }

    /// Create a card intent and mark it succeeded at the provider
    async fn paid_card_intent(&self, user_id: Uuid, plan: &str) -> String {
        let created = self
            .billing
            .payments
            .create_card_intent(user_id, plan)
            .await
            .unwrap();
        self.card.succeed(&created.payment_intent_id);
        created.payment_intent_id
    }
}

fn card_event(event_type: &str, intent_id: &str) -> (String, String) {
    let payload = serde_json::json!({
        "id": format!("evt_{}", Uuid::new_v4().simple()),
        "type": event_type,
        "data": { "object": { "id": intent_id, "object": "payment_intent" } }
    })
    .to_string();
    let t = OffsetDateTime::now_utc().unix_timestamp();
    let header = sign_card_payload(CARD_SECRET, &payload, t).unwrap();
    (payload, header)
}

fn async_notification(payment_id: &str, status: &str, request_id: &str) -> (String, String) {
    let payload = serde_json::json!({
        "type": "payment",
        "action": "payment.updated",
        "data": { "id": payment_id, "status": status }
    })
    .to_string();
    let header =
        sign_async_notification(ASYNC_SECRET, payment_id, request_id, 1_735_689_600).unwrap();
    (payload, header)
}

mod entitlement_tests {
    use super::*;

    // =========================================================================
    // Fresh registration resolves to free with the full free quota
    // =========================================================================
    #[tokio::test]
    async fn test_fresh_registration_is_free_with_full_quota() {
        let h = harness();
        let user_id = h.register("fresh@example.com").await;

        let ent = h.entitlement.resolve(user_id).await.unwrap();
        assert_eq!(ent.plan_id, PlanId::Free);
        assert_eq!(ent.remaining_ai_uses, RemainingUses::Count(20));
    }

    // =========================================================================
    // Unknown principal resolves to free instead of failing
    // =========================================================================
    #[tokio::test]
    async fn test_principal_without_subscription_resolves_to_free() {
        let h = harness();
        let ent = h.entitlement.resolve(Uuid::new_v4()).await.unwrap();
        assert_eq!(ent.plan_id, PlanId::Free);
    }
}

mod quota_tests {
    use super::*;

    // =========================================================================
    // N <= quota attempts all pass and the counter equals N
    // =========================================================================
    #[tokio::test]
    async fn test_attempts_up_to_quota_pass() {
        let h = harness();
        let user_id = h.register("count@example.com").await;

        for n in 1..=20u32 {
            let decision = h.quota.attempt_ai_use(user_id).await.unwrap();
            assert_eq!(
                decision,
                AiUseDecision::Granted {
                    remaining: RemainingUses::Count(20 - n)
                },
                "attempt {n} should pass"
            );
            assert_eq!(h.store.ai_usage(user_id).await.unwrap(), n);
        }

        assert_eq!(
            h.quota.attempt_ai_use(user_id).await.unwrap(),
            AiUseDecision::Exhausted
        );
        assert_eq!(h.store.ai_usage(user_id).await.unwrap(), 20);
    }

    // =========================================================================
    // M concurrent attempts with quota M-1: exactly M-1 granted
    // =========================================================================
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_attempts_never_over_grant() {
        use tokio::sync::Barrier;

        let h = harness();
        let user_id = h.register("race@example.com").await;
        let attempts = 21;
        let barrier = Arc::new(Barrier::new(attempts));

        let mut handles = Vec::new();
        for _ in 0..attempts {
            let quota = h.quota.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                quota.attempt_ai_use(user_id).await.unwrap()
            }));
        }

        let mut granted = 0;
        let mut exhausted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                AiUseDecision::Granted { .. } => granted += 1,
                AiUseDecision::Exhausted => exhausted += 1,
            }
        }

        assert_eq!(granted, 20);
        assert_eq!(exhausted, 1);
        assert_eq!(h.store.ai_usage(user_id).await.unwrap(), 20);
    }
}

mod card_rail_tests {
    use super::*;

    // =========================================================================
    // Free is not purchasable and creates nothing upstream
    // =========================================================================
    #[tokio::test]
    async fn test_create_intent_rejects_unpurchasable_plan() {
        let h = harness();
        let user_id = h.register("free@example.com").await;

        for plan in ["free", "gold", ""] {
            let result = h.billing.payments.create_card_intent(user_id, plan).await;
            assert!(matches!(result, Err(BillingError::InvalidPlan(_))));
        }
        assert!(h.card.intent("pi_fake0000").is_none());
    }

    #[tokio::test]
    async fn test_create_intent_carries_price_and_metadata() {
        let h = harness();
        let user_id = h.register("meta@example.com").await;

        let created = h
            .billing
            .payments
            .create_card_intent(user_id, "premium")
            .await
            .unwrap();
        let intent = h.card.intent(&created.payment_intent_id).unwrap();
        assert_eq!(intent.amount_cents, 4900);
        assert_eq!(intent.metadata["user_id"], user_id.to_string());
        assert_eq!(intent.metadata["plan_id"], "premium");
        assert_eq!(intent.metadata["type"], "subscription");
        assert!(created.client_secret.starts_with(&created.payment_intent_id));
    }

    #[tokio::test]
    async fn test_confirm_requires_terminal_success() {
        let h = harness();
        let user_id = h.register("pending@example.com").await;
        let created = h
            .billing
            .payments
            .create_card_intent(user_id, "pro")
            .await
            .unwrap();

        for state in [
            CardIntentState::Created,
            CardIntentState::AwaitingConfirmation,
            CardIntentState::Failed,
        ] {
            h.card.set_state(&created.payment_intent_id, state);
            let result = h
                .billing
                .payments
                .confirm_card_payment(&created.payment_intent_id, Some(user_id))
                .await;
            assert!(matches!(result, Err(BillingError::PaymentNotSuccessful(_))));
        }

        let sub = h.store.get_subscription(user_id).await.unwrap().unwrap();
        assert_eq!(sub.plan_id, "free");
    }

    // =========================================================================
    // Confirming twice with the same reference equals confirming once
    // =========================================================================
    #[tokio::test]
    async fn test_double_confirm_is_idempotent() {
        let h = harness();
        let user_id = h.register("twice@example.com").await;
        let intent_id = h.paid_card_intent(user_id, "pro").await;

        let first = h
            .billing
            .payments
            .confirm_card_payment(&intent_id, Some(user_id))
            .await
            .unwrap();
        tokio::time::sleep(StdDuration::from_millis(5)).await;
        let second = h
            .billing
            .payments
            .confirm_card_payment(&intent_id, Some(user_id))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(second.plan_id, "pro");
        assert_eq!(second.status, SubscriptionStatus::Active);
        assert_eq!(second.card_payment_ref.as_deref(), Some(intent_id.as_str()));
        assert_eq!(h.store.subscription_count(user_id).await, 1);
    }

    // =========================================================================
    // Client confirm racing the webhook converges on one subscription
    // =========================================================================
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_confirm_and_webhook_race_converge() {
        let h = harness();
        let user_id = h.register("race-pay@example.com").await;
        let intent_id = h.paid_card_intent(user_id, "premium").await;
        let (payload, header) = card_event("payment_intent.succeeded", &intent_id);

        let payments = h.billing.payments.clone();
        let webhooks = h.billing.webhooks.clone();
        let id = intent_id.clone();
        let confirm =
            tokio::spawn(async move { payments.confirm_card_payment(&id, Some(user_id)).await });
        let webhook =
            tokio::spawn(async move { webhooks.handle_card_webhook(&payload, &header).await });

        let confirmed = confirm.await.unwrap().unwrap();
        let outcome = webhook.await.unwrap().unwrap();
        let WebhookOutcome::Applied(from_webhook) = outcome else {
            panic!("webhook should apply, got {outcome:?}");
        };

        assert_eq!(confirmed, *from_webhook);
        assert_eq!(h.store.subscription_count(user_id).await, 1);
    }

    #[tokio::test]
    async fn test_confirm_by_another_principal_is_rejected() {
        let h = harness();
        let owner = h.register("owner@example.com").await;
        let intruder = h.register("intruder@example.com").await;
        let intent_id = h.paid_card_intent(owner, "pro").await;

        let result = h
            .billing
            .payments
            .confirm_card_payment(&intent_id, Some(intruder))
            .await;
        assert!(matches!(result, Err(BillingError::PaymentOwnerMismatch)));

        let owner_sub = h.store.get_subscription(owner).await.unwrap().unwrap();
        let intruder_sub = h.store.get_subscription(intruder).await.unwrap().unwrap();
        assert_eq!(owner_sub.plan_id, "free");
        assert_eq!(intruder_sub.plan_id, "free");
    }

    // =========================================================================
    // Status reads retry once on transport failure, never more
    // =========================================================================
    #[tokio::test]
    async fn test_confirm_retries_status_read_once() {
        let h = harness();
        let user_id = h.register("flaky@example.com").await;
        let intent_id = h.paid_card_intent(user_id, "pro").await;

        h.card.fail_next_retrieves(1);
        let sub = h
            .billing
            .payments
            .confirm_card_payment(&intent_id, Some(user_id))
            .await
            .unwrap();
        assert_eq!(sub.plan_id, "pro");
        assert_eq!(h.card.retrieve_calls(), 2);

        h.card.fail_next_retrieves(2);
        let result = h
            .billing
            .payments
            .confirm_card_payment(&intent_id, Some(user_id))
            .await;
        assert!(matches!(result, Err(BillingError::Upstream(_))));
        assert_eq!(h.card.retrieve_calls(), 4);
    }
}

mod async_rail_tests {
    use super::*;

    // =========================================================================
    // Round trip: the reference recovers (principal, plan)
    // =========================================================================
    #[tokio::test]
    async fn test_async_reference_round_trip() {
        let h = harness();
        let user_id = h.register("pix@example.com").await;

        let created = h
            .billing
            .payments
            .create_async_payment(user_id, "premium")
            .await
            .unwrap();

        let decoded = ExternalReference::decode(&created.external_reference).unwrap();
        assert_eq!((decoded.user_id, decoded.plan_id), (user_id, PlanId::Premium));

        let request = &h.pix.requests()[0];
        assert_eq!(request.amount_cents, 4900);
        assert_eq!(request.payer_email, "pix@example.com");
        assert!(created.expires_at > OffsetDateTime::now_utc() + Duration::minutes(29));
    }

    #[tokio::test]
    async fn test_confirm_pending_payment_fails() {
        let h = harness();
        let user_id = h.register("wait@example.com").await;
        let created = h
            .billing
            .payments
            .create_async_payment(user_id, "pro")
            .await
            .unwrap();

        let result = h
            .billing
            .payments
            .confirm_async_payment(&created.payment_id)
            .await;
        assert!(matches!(result, Err(BillingError::PaymentNotSuccessful(_))));
    }

    // =========================================================================
    // Past expiry, confirmation fails with Expired and nothing changes
    // =========================================================================
    #[tokio::test]
    async fn test_expired_payment_is_not_applied() {
        let h = harness();
        let user_id = h.register("late@example.com").await;
        let created = h
            .billing
            .payments
            .create_async_payment(user_id, "pro")
            .await
            .unwrap();
        let now = OffsetDateTime::now_utc();
        h.pix.set_expiry(&created.payment_id, now - Duration::minutes(1));

        let pending = h
            .billing
            .payments
            .confirm_async_payment(&created.payment_id)
            .await;
        assert!(matches!(pending, Err(BillingError::Expired(_))));

        h.pix.approve(&created.payment_id, now);
        let approved_late = h
            .billing
            .payments
            .confirm_async_payment(&created.payment_id)
            .await;
        assert!(matches!(approved_late, Err(BillingError::Expired(_))));

        let sub = h.store.get_subscription(user_id).await.unwrap().unwrap();
        assert_eq!(sub.plan_id, "free");
    }

    #[tokio::test]
    async fn test_poll_applies_approved_payment_for_owner_only() {
        let h = harness();
        let user_id = h.register("poll@example.com").await;
        let other = h.register("nosy@example.com").await;
        let created = h
            .billing
            .payments
            .create_async_payment(user_id, "pro")
            .await
            .unwrap();

        let poll = h
            .billing
            .payments
            .poll_async_payment(user_id, &created.payment_id)
            .await
            .unwrap();
        assert_eq!(poll.status, "pending");
        assert!(poll.subscription.is_none());

        assert!(matches!(
            h.billing
                .payments
                .poll_async_payment(other, &created.payment_id)
                .await,
            Err(BillingError::PaymentOwnerMismatch)
        ));

        h.pix.approve(&created.payment_id, OffsetDateTime::now_utc());
        let poll = h
            .billing
            .payments
            .poll_async_payment(user_id, &created.payment_id)
            .await
            .unwrap();
        assert_eq!(poll.status, "approved");
        assert_eq!(poll.subscription.unwrap().plan_id, "pro");
    }

    // =========================================================================
    // A new payment on the other rail replaces the stored reference
    // =========================================================================
    #[tokio::test]
    async fn test_switching_rails_keeps_single_reference() {
        let h = harness();
        let user_id = h.register("switch@example.com").await;
        let intent_id = h.paid_card_intent(user_id, "pro").await;
        h.billing
            .payments
            .confirm_card_payment(&intent_id, Some(user_id))
            .await
            .unwrap();

        let created = h
            .billing
            .payments
            .create_async_payment(user_id, "premium")
            .await
            .unwrap();
        h.pix.approve(&created.payment_id, OffsetDateTime::now_utc());
        let sub = h
            .billing
            .payments
            .confirm_async_payment(&created.payment_id)
            .await
            .unwrap();

        assert_eq!(sub.plan_id, "premium");
        assert_eq!(sub.card_payment_ref, None);
        assert_eq!(sub.async_payment_ref.as_deref(), Some(created.payment_id.as_str()));
    }
}

mod webhook_tests {
    use super::*;

    // =========================================================================
    // Async webhook before any poll activates the subscription
    // =========================================================================
    #[tokio::test]
    async fn test_async_webhook_before_poll_activates_premium() {
        let h = harness();
        let user_id = h.register("webhook-first@example.com").await;
        let now = OffsetDateTime::now_utc();
        h.pix.insert(AsyncPayment {
            id: "555000".to_string(),
            status: AsyncPaymentStatus::Approved,
            external_reference: Some(format!("{user_id}_premium_{}", now.unix_timestamp() * 1000)),
            qr_code: None,
            qr_code_base64: None,
            expires_at: Some(now + Duration::minutes(10)),
            approved_at: Some(now),
        });

        let (payload, header) = async_notification("555000", "approved", "req-1");
        let outcome = h
            .billing
            .webhooks
            .handle_async_webhook(&payload, &header, "req-1")
            .await
            .unwrap();
        assert!(matches!(outcome, WebhookOutcome::Applied(_)));

        let sub = h
            .billing
            .payments
            .get_subscription_status(user_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sub.plan_id, "premium");
        assert_eq!(sub.status, SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn test_async_webhook_with_bad_reference_is_acknowledged() {
        let h = harness();
        let now = OffsetDateTime::now_utc();
        h.pix.insert(AsyncPayment {
            id: "555001".to_string(),
            status: AsyncPaymentStatus::Approved,
            external_reference: Some("someone_gold".to_string()),
            qr_code: None,
            qr_code_base64: None,
            expires_at: Some(now + Duration::minutes(10)),
            approved_at: Some(now),
        });

        let (payload, header) = async_notification("555001", "approved", "req-2");
        let outcome = h
            .billing
            .webhooks
            .handle_async_webhook(&payload, &header, "req-2")
            .await
            .unwrap();
        let WebhookOutcome::Failed(reason) = outcome else {
            panic!("expected a failed outcome, got {outcome:?}");
        };
        assert!(reason.contains("Invalid payment reference"));
    }

    #[tokio::test]
    async fn test_async_webhook_ignores_non_approved_status() {
        let h = harness();
        let (payload, header) = async_notification("1", "pending", "req-3");
        let outcome = h
            .billing
            .webhooks
            .handle_async_webhook(&payload, &header, "req-3")
            .await
            .unwrap();
        assert!(matches!(outcome, WebhookOutcome::Ignored(_)));
    }

    #[tokio::test]
    async fn test_async_webhook_without_status_is_ignored() {
        let h = harness();
        let user_id = h.register("no-status@example.com").await;
        let now = OffsetDateTime::now_utc();
        h.pix.insert(AsyncPayment {
            id: "555002".to_string(),
            status: AsyncPaymentStatus::Approved,
            external_reference: Some(format!("{user_id}_premium_{}", now.unix_timestamp() * 1000)),
            qr_code: None,
            qr_code_base64: None,
            expires_at: Some(now + Duration::minutes(10)),
            approved_at: Some(now),
        });

        let payload = serde_json::json!({
            "type": "payment",
            "action": "payment.updated",
            "data": { "id": "555002" }
        })
        .to_string();
        let header =
            sign_async_notification(ASYNC_SECRET, "555002", "req-5", 1_735_689_600).unwrap();
        let outcome = h
            .billing
            .webhooks
            .handle_async_webhook(&payload, &header, "req-5")
            .await
            .unwrap();

        assert_eq!(outcome, WebhookOutcome::Ignored("status missing".to_string()));
        let sub = h.store.get_subscription(user_id).await.unwrap().unwrap();
        assert_eq!(sub.plan_id, "free");
    }

    #[tokio::test]
    async fn test_invalid_signatures_are_rejected() {
        let h = harness();
        let (payload, _) = card_event("payment_intent.succeeded", "pi_fake0000");
        let result = h
            .billing
            .webhooks
            .handle_card_webhook(&payload, "t=1,v1=deadbeef")
            .await;
        assert!(matches!(result, Err(BillingError::WebhookSignatureInvalid)));

        let (payload, header) = async_notification("7", "approved", "req-4");
        let result = h
            .billing
            .webhooks
            .handle_async_webhook(&payload, &header, "req-other")
            .await;
        assert!(matches!(result, Err(BillingError::WebhookSignatureInvalid)));
    }

    #[tokio::test]
    async fn test_card_webhook_ignores_other_events() {
        let h = harness();
        let user_id = h.register("ignored@example.com").await;
        let intent_id = h.paid_card_intent(user_id, "pro").await;

        let (payload, header) = card_event("payment_intent.payment_failed", &intent_id);
        let outcome = h
            .billing
            .webhooks
            .handle_card_webhook(&payload, &header)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::Ignored("payment_intent.payment_failed".to_string())
        );
        let sub = h.store.get_subscription(user_id).await.unwrap().unwrap();
        assert_eq!(sub.plan_id, "free");
    }

    // =========================================================================
    // Replayed webhook does not reset usage or move the period
    // =========================================================================
    #[tokio::test]
    async fn test_replayed_webhook_has_no_side_effects() {
        let h = harness();
        let user_id = h.register("replay@example.com").await;
        let intent_id = h.paid_card_intent(user_id, "pro").await;

        let (payload, header) = card_event("payment_intent.succeeded", &intent_id);
        let WebhookOutcome::Applied(first) = h
            .billing
            .webhooks
            .handle_card_webhook(&payload, &header)
            .await
            .unwrap()
        else {
            panic!("first delivery should apply");
        };

        for _ in 0..3 {
            h.quota.attempt_ai_use(user_id).await.unwrap();
        }

        let WebhookOutcome::Applied(replayed) = h
            .billing
            .webhooks
            .handle_card_webhook(&payload, &header)
            .await
            .unwrap()
        else {
            panic!("replay should be acknowledged as applied");
        };

        assert_eq!(first.current_period_end, replayed.current_period_end);
        assert_eq!(h.store.ai_usage(user_id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_unparseable_card_event_is_acknowledged() {
        let h = harness();
        let payload = "{not json";
        let t = OffsetDateTime::now_utc().unix_timestamp();
        let sig = compute_signature(CARD_SECRET, &format!("{t}.{payload}")).unwrap();
        let outcome = h
            .billing
            .webhooks
            .handle_card_webhook(payload, &format!("t={t},v1={sig}"))
            .await
            .unwrap();
        assert!(matches!(outcome, WebhookOutcome::Failed(_)));
    }
}

mod cancellation_tests {
    use super::*;

    // =========================================================================
    // No subscription: NotFound and no mutation
    // =========================================================================
    #[tokio::test]
    async fn test_cancel_without_subscription_is_not_found() {
        let h = harness();
        let ghost = Uuid::new_v4();

        let result = h.billing.payments.cancel_subscription(ghost).await;
        let err = result.unwrap_err();
        assert!(matches!(err, BillingError::SubscriptionNotFound(_)));
        assert_eq!(err.class(), crate::error::ErrorClass::NotFound);
        assert_eq!(h.store.subscription_count(ghost).await, 0);
        assert!(h.card.canceled().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_cancels_card_intent_upstream() {
        let h = harness();
        let user_id = h.register("cancel@example.com").await;
        let intent_id = h.paid_card_intent(user_id, "pro").await;
        h.billing
            .payments
            .confirm_card_payment(&intent_id, Some(user_id))
            .await
            .unwrap();

        let sub = h.billing.payments.cancel_subscription(user_id).await.unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Canceled);
        assert!(sub.canceled_at.is_some());
        assert_eq!(h.card.canceled(), vec![intent_id]);
    }

    // =========================================================================
    // Upstream cancel failure is logged, local cancel still commits
    // =========================================================================
    #[tokio::test]
    async fn test_cancel_commits_when_upstream_fails() {
        let h = harness();
        let user_id = h.register("stubborn@example.com").await;
        let intent_id = h.paid_card_intent(user_id, "premium").await;
        h.billing
            .payments
            .confirm_card_payment(&intent_id, Some(user_id))
            .await
            .unwrap();
        h.card.fail_cancels();

        let sub = h.billing.payments.cancel_subscription(user_id).await.unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Canceled);
        assert!(h.card.canceled().is_empty());

        let ent = h.entitlement.resolve(user_id).await.unwrap();
        assert_eq!(ent.plan_id, PlanId::Premium, "paid period still runs");
    }

    #[tokio::test]
    async fn test_replay_after_cancel_does_not_resurrect() {
        let h = harness();
        let user_id = h.register("zombie@example.com").await;
        let intent_id = h.paid_card_intent(user_id, "pro").await;
        h.billing
            .payments
            .confirm_card_payment(&intent_id, None)
            .await
            .unwrap();
        h.billing.payments.cancel_subscription(user_id).await.unwrap();

        // The fake marks canceled intents as failed; put it back to simulate a
        // provider that still reports success.
        h.card.succeed(&intent_id);
        let sub = h
            .billing
            .payments
            .confirm_card_payment(&intent_id, None)
            .await
            .unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Canceled);
    }
}

mod scenario_tests {
    use super::*;

    // =========================================================================
    // Free quota exhausted, upgrade to pro by card, counter resets
    // =========================================================================
    #[tokio::test]
    async fn test_exhaust_free_then_upgrade_to_pro() {
        let h = harness();
        let user_id = h.register("journey@example.com").await;

        for _ in 0..20 {
            assert!(h.quota.attempt_ai_use(user_id).await.unwrap().is_granted());
        }
        assert_eq!(
            h.quota.attempt_ai_use(user_id).await.unwrap(),
            AiUseDecision::Exhausted
        );

        let intent_id = h.paid_card_intent(user_id, "pro").await;
        h.billing
            .payments
            .confirm_card_payment(&intent_id, Some(user_id))
            .await
            .unwrap();

        assert_eq!(h.store.ai_usage(user_id).await.unwrap(), 0);
        let ent = h.entitlement.resolve(user_id).await.unwrap();
        assert_eq!(ent.plan_id, PlanId::Pro);
        assert_eq!(ent.remaining_ai_uses, RemainingUses::Count(150));
    }

    #[tokio::test]
    async fn test_period_is_thirty_days() {
        let h = harness();
        let user_id = h.register("period@example.com").await;
        let intent_id = h.paid_card_intent(user_id, "pro").await;
        let sub = h
            .billing
            .payments
            .confirm_card_payment(&intent_id, Some(user_id))
            .await
            .unwrap();

        let start = sub.current_period_start.unwrap();
        let end = sub.current_period_end.unwrap();
        assert_eq!(end - start, crate::BILLING_PERIOD);
    }
}
