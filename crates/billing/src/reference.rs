//! External reference codec for the async rail
//!
//! The reference embeds the principal and plan so a notification can be applied
//! without a local lookup table: `<principal uuid>_<plan id>_<unix millis>`.

use time::OffsetDateTime;
use uuid::Uuid;
use vendeai_shared::PlanId;

use crate::error::{BillingError, BillingResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalReference {
    pub user_id: Uuid,
    pub plan_id: PlanId,
    pub created_at_ms: i64,
}

impl ExternalReference {
    pub fn new(user_id: Uuid, plan_id: PlanId, at: OffsetDateTime) -> Self {
        Self {
            user_id,
            plan_id,
            created_at_ms: (at.unix_timestamp_nanos() / 1_000_000) as i64,
        }
    }

    pub fn encode(&self) -> String {
        format!("{}_{}_{}", self.user_id, self.plan_id, self.created_at_ms)
    }

    /// Decode a reference, requiring a principal id and a purchasable plan
    pub fn decode(raw: &str) -> BillingResult<Self> {
        let invalid = || BillingError::InvalidReference(raw.to_string());

        let mut parts = raw.split('_');
        let (Some(user), Some(plan), Some(ts), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };

        let user_id = Uuid::parse_str(user).map_err(|_| invalid())?;
        let plan_id = plan.parse::<PlanId>().map_err(|_| invalid())?;
        if !plan_id.is_paid() {
            return Err(invalid());
        }
        let created_at_ms = ts.parse::<i64>().map_err(|_| invalid())?;

        Ok(Self {
            user_id,
            plan_id,
            created_at_ms,
        })
    }
}
