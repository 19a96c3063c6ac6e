//! In-process gateway fakes for orchestration tests
//!
//! Enabled for this crate's tests and, through the `test-util` feature, for
//! downstream crates' tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::client::{CardGateway, CardIntent, CardIntentState};
use crate::error::{BillingError, BillingResult};
use crate::mercadopago::{AsyncGateway, AsyncPayment, AsyncPaymentRequest, AsyncPaymentStatus};
use crate::webhooks::compute_signature;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// `Stripe-Signature` header value for a card webhook payload sent at `t`
pub fn sign_card_payload(secret: &str, payload: &str, t: i64) -> BillingResult<String> {
    let sig = compute_signature(secret, &format!("{t}.{payload}"))?;
    Ok(format!("t={t},v1={sig}"))
}

/// `x-signature` header value for an async notification about `data_id`
pub fn sign_async_notification(
    secret: &str,
    data_id: &str,
    request_id: &str,
    ts: i64,
) -> BillingResult<String> {
    let manifest = format!("id:{data_id};request-id:{request_id};ts:{ts};");
    let sig = compute_signature(secret, &manifest)?;
    Ok(format!("ts={ts},v1={sig}"))
}

/// Card provider fake keeping intents in memory
#[derive(Default)]
pub struct FakeCardGateway {
    intents: Mutex<HashMap<String, CardIntent>>,
    canceled: Mutex<Vec<String>>,
    next_id: AtomicUsize,
    retrieve_calls: AtomicUsize,
    /// Number of upcoming retrieves that fail with a transport error
    retrieve_failures: AtomicUsize,
    fail_cancel: AtomicBool,
}

impl FakeCardGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_state(&self, intent_id: &str, state: CardIntentState) {
        if let Some(intent) = lock(&self.intents).get_mut(intent_id) {
            intent.state = state;
        }
    }

    /// Shorthand for the client completing the card SDK flow
    pub fn succeed(&self, intent_id: &str) {
        self.set_state(intent_id, CardIntentState::Succeeded);
    }

    pub fn insert(&self, intent: CardIntent) {
        lock(&self.intents).insert(intent.id.clone(), intent);
    }

    pub fn intent(&self, intent_id: &str) -> Option<CardIntent> {
        lock(&self.intents).get(intent_id).cloned()
    }

    pub fn canceled(&self) -> Vec<String> {
        lock(&self.canceled).clone()
    }

    pub fn retrieve_calls(&self) -> usize {
        self.retrieve_calls.load(Ordering::SeqCst)
    }

    pub fn fail_next_retrieves(&self, n: usize) {
        self.retrieve_failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_cancels(&self) {
        self.fail_cancel.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl CardGateway for FakeCardGateway {
    async fn create_intent(
        &self,
        amount_cents: i64,
        metadata: HashMap<String, String>,
    ) -> BillingResult<CardIntent> {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let id = format!("pi_fake{n:04}");
        let intent = CardIntent {
            id: id.clone(),
            client_secret: Some(format!("{id}_secret_fake")),
            amount_cents,
            state: CardIntentState::Created,
            metadata,
        };
        self.insert(intent.clone());
        Ok(intent)
    }

    async fn retrieve_intent(&self, intent_id: &str) -> BillingResult<CardIntent> {
        self.retrieve_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .retrieve_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(BillingError::Upstream("connection reset".to_string()));
        }
        self.intent(intent_id)
            .ok_or_else(|| BillingError::UpstreamRejected(format!("no such intent {intent_id}")))
    }

    async fn cancel_intent(&self, intent_id: &str) -> BillingResult<()> {
        if self.fail_cancel.load(Ordering::SeqCst) {
            return Err(BillingError::UpstreamRejected(
                "intent cannot be canceled".to_string(),
            ));
        }
        self.set_state(intent_id, CardIntentState::Failed);
        lock(&self.canceled).push(intent_id.to_string());
        Ok(())
    }
}

/// Async/QR provider fake keeping payments in memory
#[derive(Default)]
pub struct FakeAsyncGateway {
    payments: Mutex<HashMap<String, AsyncPayment>>,
    requests: Mutex<Vec<AsyncPaymentRequest>>,
    next_id: AtomicUsize,
}

impl FakeAsyncGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, payment: AsyncPayment) {
        lock(&self.payments).insert(payment.id.clone(), payment);
    }

    pub fn payment(&self, payment_id: &str) -> Option<AsyncPayment> {
        lock(&self.payments).get(payment_id).cloned()
    }

    /// Mark a payment approved at the given instant
    pub fn approve(&self, payment_id: &str, at: OffsetDateTime) {
        if let Some(p) = lock(&self.payments).get_mut(payment_id) {
            p.status = AsyncPaymentStatus::Approved;
            p.approved_at = Some(at);
        }
    }

    pub fn set_expiry(&self, payment_id: &str, expires_at: OffsetDateTime) {
        if let Some(p) = lock(&self.payments).get_mut(payment_id) {
            p.expires_at = Some(expires_at);
        }
    }

    pub fn requests(&self) -> Vec<AsyncPaymentRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl AsyncGateway for FakeAsyncGateway {
    async fn create_payment(&self, request: AsyncPaymentRequest) -> BillingResult<AsyncPayment> {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let payment = AsyncPayment {
            id: (10_000 + n).to_string(),
            status: AsyncPaymentStatus::Pending,
            external_reference: Some(request.external_reference.clone()),
            qr_code: Some("00020126580014br.gov.bcb.pix".to_string()),
            qr_code_base64: Some("iVBORw0KGgo=".to_string()),
            expires_at: Some(request.expires_at),
            approved_at: None,
        };
        lock(&self.requests).push(request);
        self.insert(payment.clone());
        Ok(payment)
    }

    async fn get_payment(&self, payment_id: &str) -> BillingResult<AsyncPayment> {
        self.payment(payment_id)
            .ok_or_else(|| BillingError::UpstreamRejected(format!("no such payment {payment_id}")))
    }
}
