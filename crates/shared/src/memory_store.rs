//! In-memory [`Store`] for tests and local development
//!
//! All state sits behind one mutex, so each trait call is atomic with respect to
//! every other call.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::store::Store;
use crate::types::{
    ConfirmedPayment, NewPrincipal, OAuthProvider, PaymentApplication, PaymentRail, Principal,
    ProfileUpdate, Session, Subscription, SubscriptionStatus,
};

#[derive(Default)]
struct MemoryState {
    principals: HashMap<Uuid, Principal>,
    sessions: HashMap<String, Session>,
    subscriptions: HashMap<Uuid, Subscription>,
    usage: HashMap<Uuid, u32>,
    applied_payments: HashSet<PaymentRail>,
}

impl MemoryState {
    fn email_taken(&self, email: &str) -> bool {
        self.principals.values().any(|p| p.email == email)
    }

    fn oauth_taken(&self, provider: OAuthProvider, provider_id: &str) -> bool {
        self.principals.values().any(|p| {
            p.oauth_provider == Some(provider) && p.oauth_provider_id.as_deref() == Some(provider_id)
        })
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a stored subscription's plan id verbatim, bypassing payment checks.
    ///
    /// Used to simulate rows written under an older catalog.
    pub async fn force_plan_id(&self, user_id: Uuid, plan_id: &str) {
        let mut state = self.state.lock().await;
        if let Some(sub) = state.subscriptions.get_mut(&user_id) {
            sub.plan_id = plan_id.to_string();
        }
    }

    /// Number of sessions currently stored for a principal
    pub async fn session_count(&self, user_id: Uuid) -> usize {
        let state = self.state.lock().await;
        state.sessions.values().filter(|s| s.user_id == user_id).count()
    }

    /// Number of subscription rows for a principal (0 or 1)
    pub async fn subscription_count(&self, user_id: Uuid) -> usize {
        let state = self.state.lock().await;
        usize::from(state.subscriptions.contains_key(&user_id))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_principal(&self, new: NewPrincipal) -> StoreResult<Principal> {
        let mut state = self.state.lock().await;

        if state.email_taken(&new.email) {
            return Err(StoreError::Conflict("users_email_key".to_string()));
        }
        if let Some((provider, provider_id)) = &new.oauth {
            if state.oauth_taken(*provider, provider_id) {
                return Err(StoreError::Conflict("users_oauth_identity_key".to_string()));
            }
        }

        let now = OffsetDateTime::now_utc();
        let (oauth_provider, oauth_provider_id) = match new.oauth {
            Some((provider, id)) => (Some(provider), Some(id)),
            None => (None, None),
        };
        let principal = Principal {
            id: Uuid::new_v4(),
            email: new.email,
            name: new.name,
            avatar: new.avatar,
            locale: Default::default(),
            password_hash: new.password_hash,
            oauth_provider,
            oauth_provider_id,
            email_verified: new.email_verified,
            created_at: now,
            updated_at: now,
        };

        state
            .subscriptions
            .insert(principal.id, Subscription::free(principal.id, now));
        state.usage.insert(principal.id, 0);
        state.principals.insert(principal.id, principal.clone());

        Ok(principal)
    }

    async fn find_principal(&self, id: Uuid) -> StoreResult<Option<Principal>> {
        Ok(self.state.lock().await.principals.get(&id).cloned())
    }

    async fn find_principal_by_email(&self, email: &str) -> StoreResult<Option<Principal>> {
        let state = self.state.lock().await;
        Ok(state.principals.values().find(|p| p.email == email).cloned())
    }

    async fn find_principal_by_oauth(
        &self,
        provider: OAuthProvider,
        provider_id: &str,
    ) -> StoreResult<Option<Principal>> {
        let state = self.state.lock().await;
        Ok(state
            .principals
            .values()
            .find(|p| {
                p.oauth_provider == Some(provider)
                    && p.oauth_provider_id.as_deref() == Some(provider_id)
            })
            .cloned())
    }

    async fn link_oauth_identity(
        &self,
        id: Uuid,
        provider: OAuthProvider,
        provider_id: &str,
    ) -> StoreResult<Principal> {
        let mut state = self.state.lock().await;
        if state.oauth_taken(provider, provider_id) {
            return Err(StoreError::Conflict("users_oauth_identity_key".to_string()));
        }
        let principal = state
            .principals
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("principal {id}")))?;
        principal.oauth_provider = Some(provider);
        principal.oauth_provider_id = Some(provider_id.to_string());
        principal.email_verified = true;
        principal.updated_at = OffsetDateTime::now_utc();
        Ok(principal.clone())
    }

    async fn update_profile(&self, id: Uuid, update: ProfileUpdate) -> StoreResult<Principal> {
        let mut state = self.state.lock().await;
        let principal = state
            .principals
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("principal {id}")))?;
        if let Some(name) = update.name {
            principal.name = name;
        }
        if let Some(avatar) = update.avatar {
            principal.avatar = Some(avatar);
        }
        if let Some(locale) = update.locale {
            principal.locale = locale;
        }
        principal.updated_at = OffsetDateTime::now_utc();
        Ok(principal.clone())
    }

    async fn insert_session(&self, session: &Session) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if state.sessions.contains_key(&session.token_id) {
            return Err(StoreError::Conflict("sessions_pkey".to_string()));
        }
        state
            .sessions
            .insert(session.token_id.clone(), session.clone());
        Ok(())
    }

    async fn find_session(&self, token_id: &str) -> StoreResult<Option<Session>> {
        Ok(self.state.lock().await.sessions.get(token_id).cloned())
    }

    async fn delete_session(&self, token_id: &str) -> StoreResult<bool> {
        Ok(self.state.lock().await.sessions.remove(token_id).is_some())
    }

    async fn get_subscription(&self, user_id: Uuid) -> StoreResult<Option<Subscription>> {
        Ok(self.state.lock().await.subscriptions.get(&user_id).cloned())
    }

    async fn apply_payment(&self, payment: &ConfirmedPayment) -> StoreResult<PaymentApplication> {
        let mut state = self.state.lock().await;

        if !state.applied_payments.insert(payment.rail.clone()) {
            let subscription = state
                .subscriptions
                .get(&payment.user_id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(format!("subscription {}", payment.user_id)))?;
            return Ok(PaymentApplication {
                subscription,
                applied: false,
            });
        }

        let now = OffsetDateTime::now_utc();
        let (card_payment_ref, async_payment_ref) = match &payment.rail {
            PaymentRail::Card(r) => (Some(r.clone()), None),
            PaymentRail::Async(r) => (None, Some(r.clone())),
        };
        let previous = state.subscriptions.get(&payment.user_id);
        let subscription = Subscription {
            id: previous.map(|s| s.id).unwrap_or_else(Uuid::new_v4),
            user_id: payment.user_id,
            plan_id: payment.plan_id.as_str().to_string(),
            status: SubscriptionStatus::Active,
            current_period_start: Some(payment.period_start),
            current_period_end: Some(payment.period_end),
            card_payment_ref,
            async_payment_ref,
            canceled_at: None,
            created_at: previous.map(|s| s.created_at).unwrap_or(now),
            updated_at: now,
        };

        state
            .subscriptions
            .insert(payment.user_id, subscription.clone());
        state.usage.insert(payment.user_id, 0);

        Ok(PaymentApplication {
            subscription,
            applied: true,
        })
    }

    async fn cancel_subscription(
        &self,
        user_id: Uuid,
        canceled_at: OffsetDateTime,
    ) -> StoreResult<Option<Subscription>> {
        let mut state = self.state.lock().await;
        Ok(state.subscriptions.get_mut(&user_id).map(|sub| {
            sub.status = SubscriptionStatus::Canceled;
            sub.canceled_at = Some(canceled_at);
            sub.updated_at = canceled_at;
            sub.clone()
        }))
    }

    async fn ai_usage(&self, user_id: Uuid) -> StoreResult<u32> {
        Ok(self
            .state
            .lock()
            .await
            .usage
            .get(&user_id)
            .copied()
            .unwrap_or(0))
    }

    async fn try_consume_ai_use(
        &self,
        user_id: Uuid,
        quota: Option<u32>,
    ) -> StoreResult<Option<u32>> {
        let mut state = self.state.lock().await;
        let used = state.usage.entry(user_id).or_insert(0);
        match quota {
            Some(limit) if *used >= limit => Ok(None),
            _ => {
                *used += 1;
                Ok(Some(*used))
            }
        }
    }

    async fn release_ai_use(&self, user_id: Uuid) -> StoreResult<u32> {
        let mut state = self.state.lock().await;
        let used = state.usage.entry(user_id).or_insert(0);
        *used = used.saturating_sub(1);
        Ok(*used)
    }
}
