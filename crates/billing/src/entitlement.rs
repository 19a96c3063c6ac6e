//! Entitlement Module
//!
//! Answers "what plan does this principal have and how many AI uses are left?"
//!
//! `compute_entitlement` is a pure function of (subscription, usage counter,
//! static catalog, clock). [`EntitlementResolver`] only loads those inputs.

use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;
use vendeai_shared::{
    has_capability, plan_or_free, AiQuota, Capability, Plan, PlanId, RemainingUses, Store,
    Subscription, SubscriptionStatus,
};

use crate::error::BillingResult;

/// Why the principal has the plan it has
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitlementState {
    /// No paid subscription
    Free,
    /// Paid subscription in good standing
    Active,
    /// Canceled, still inside the paid period
    CanceledGrace,
    /// Canceled and the paid period is over
    Canceled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Entitlement {
    pub plan_id: PlanId,
    pub plan_name: &'static str,
    pub state: EntitlementState,
    pub ai_quota: AiQuota,
    pub ai_uses: u32,
    pub remaining_ai_uses: RemainingUses,
    pub max_products: Option<u32>,
    pub capabilities: Vec<Capability>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub period_end: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub computed_at: OffsetDateTime,
}

impl Entitlement {
    pub fn plan(&self) -> &'static Plan {
        self.plan_id.plan()
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        has_capability(self.plan(), capability)
    }

    pub fn can_use_ai(&self) -> bool {
        !self.remaining_ai_uses.is_exhausted()
    }
}

/// Pure entitlement computation
pub fn compute_entitlement(
    subscription: Option<&Subscription>,
    ai_uses: u32,
    now: OffsetDateTime,
) -> Entitlement {
    let (plan, state, period_end) = match subscription {
        None => (PlanId::Free.plan(), EntitlementState::Free, None),
        Some(sub) => {
            let stored = plan_or_free(&sub.plan_id);
            match sub.status {
                SubscriptionStatus::Active if stored.id.is_paid() => {
                    (stored, EntitlementState::Active, sub.current_period_end)
                }
                SubscriptionStatus::Active => (stored, EntitlementState::Free, None),
                SubscriptionStatus::Canceled => match sub.current_period_end {
                    Some(end) if end > now && stored.id.is_paid() => {
                        (stored, EntitlementState::CanceledGrace, Some(end))
                    }
                    _ => (PlanId::Free.plan(), EntitlementState::Canceled, None),
                },
            }
        }
    };

    Entitlement {
        plan_id: plan.id,
        plan_name: plan.name,
        state,
        ai_quota: plan.ai_quota,
        ai_uses,
        remaining_ai_uses: plan.ai_quota.remaining(ai_uses),
        max_products: plan.product_limit(),
        capabilities: Capability::ALL
            .into_iter()
            .filter(|cap| has_capability(plan, *cap))
            .collect(),
        period_end,
        computed_at: now,
    }
}

/// Loads the inputs of [`compute_entitlement`] from the store
#[derive(Clone)]
pub struct EntitlementResolver {
    store: Arc<dyn Store>,
}

impl EntitlementResolver {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, user_id: Uuid) -> BillingResult<Entitlement> {
        let subscription = self.store.get_subscription(user_id).await?;
        let used = self.store.ai_usage(user_id).await?;
        Ok(compute_entitlement(
            subscription.as_ref(),
            used,
            OffsetDateTime::now_utc(),
        ))
    }
}
