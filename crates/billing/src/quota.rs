//! Session/quota guard for AI-invoking actions

use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;
use vendeai_shared::{RemainingUses, Store};

use crate::entitlement::compute_entitlement;
use crate::error::BillingResult;

/// Outcome of an AI-use attempt; exhaustion is a value, not an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum AiUseDecision {
    Granted { remaining: RemainingUses },
    Exhausted,
}

impl AiUseDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self, AiUseDecision::Granted { .. })
    }
}

#[derive(Clone)]
pub struct QuotaGuard {
    store: Arc<dyn Store>,
}

impl QuotaGuard {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Reserve one AI use for the principal.
    ///
    /// The counter check and increment happen in one store operation, so
    /// concurrent attempts can never push usage past a finite quota.
    pub async fn attempt_ai_use(&self, user_id: Uuid) -> BillingResult<AiUseDecision> {
        let subscription = self.store.get_subscription(user_id).await?;
        let entitlement = compute_entitlement(subscription.as_ref(), 0, OffsetDateTime::now_utc());
        let quota = entitlement.ai_quota;

        match self.store.try_consume_ai_use(user_id, quota.limit()).await? {
            Some(used) => {
                let remaining = quota.remaining(used);
                tracing::debug!(user_id = %user_id, used, %remaining, "AI use granted");
                Ok(AiUseDecision::Granted { remaining })
            }
            None => {
                tracing::info!(
                    user_id = %user_id,
                    plan_id = %entitlement.plan_id,
                    "AI quota exhausted"
                );
                Ok(AiUseDecision::Exhausted)
            }
        }
    }

    /// Return a use reserved for an action that then failed
    pub async fn release_ai_use(&self, user_id: Uuid) -> BillingResult<u32> {
        let used = self.store.release_ai_use(user_id).await?;
        tracing::debug!(user_id = %user_id, used, "AI use released");
        Ok(used)
    }
}
