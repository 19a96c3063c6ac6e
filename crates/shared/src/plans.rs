//! Static plan catalog and capability gating
//!
//! Plans are configuration, not user data. There is exactly one definition per
//! [`PlanId`], and every crate in the workspace reads the same catalog.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a catalog plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanId {
    Free,
    Pro,
    Premium,
}

impl PlanId {
    pub const ALL: [PlanId; 3] = [PlanId::Free, PlanId::Pro, PlanId::Premium];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanId::Free => "free",
            PlanId::Pro => "pro",
            PlanId::Premium => "premium",
        }
    }

    /// Plans that can be bought through either payment rail
    pub fn is_paid(&self) -> bool {
        !matches!(self, PlanId::Free)
    }

    /// Catalog entry for this id
    pub fn plan(&self) -> &'static Plan {
        match self {
            PlanId::Free => &FREE,
            PlanId::Pro => &PRO,
            PlanId::Premium => &PREMIUM,
        }
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string does not name a catalog plan
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown plan id: {0}")]
pub struct UnknownPlan(pub String);

impl FromStr for PlanId {
    type Err = UnknownPlan;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(PlanId::Free),
            "pro" => Ok(PlanId::Pro),
            "premium" => Ok(PlanId::Premium),
            other => Err(UnknownPlan(other.to_string())),
        }
    }
}

/// AI-usage allowance of a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "limit")]
pub enum AiQuota {
    Limited(u32),
    Unlimited,
}

impl AiQuota {
    /// Finite limit, `None` when unlimited
    pub fn limit(&self) -> Option<u32> {
        match self {
            AiQuota::Limited(n) => Some(*n),
            AiQuota::Unlimited => None,
        }
    }

    /// Uses left after `used` successful actions
    pub fn remaining(&self, used: u32) -> RemainingUses {
        match self {
            AiQuota::Limited(n) => RemainingUses::Count(n.saturating_sub(used)),
            AiQuota::Unlimited => RemainingUses::Unlimited,
        }
    }
}

/// Remaining AI uses; serialized as a number or the string `"unlimited"`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemainingUses {
    Count(u32),
    Unlimited,
}

impl RemainingUses {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, RemainingUses::Count(0))
    }
}

impl fmt::Display for RemainingUses {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemainingUses::Count(n) => write!(f, "{n}"),
            RemainingUses::Unlimited => f.write_str("unlimited"),
        }
    }
}

impl Serialize for RemainingUses {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RemainingUses::Count(n) => serializer.serialize_u32(*n),
            RemainingUses::Unlimited => serializer.serialize_str("unlimited"),
        }
    }
}

impl<'de> Deserialize<'de> for RemainingUses {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Count(u32),
            Word(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Count(n) => Ok(RemainingUses::Count(n)),
            Raw::Word(w) if w == "unlimited" => Ok(RemainingUses::Unlimited),
            Raw::Word(w) => Err(serde::de::Error::custom(format!(
                "expected a count or \"unlimited\", got {w}"
            ))),
        }
    }
}

/// A catalog plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub id: PlanId,
    pub name: &'static str,
    /// Monthly price in centavos (BRL minor units)
    pub monthly_price_cents: i64,
    /// Annual price in centavos, when the plan is sold yearly
    pub annual_price_cents: Option<i64>,
    pub ai_quota: AiQuota,
    /// Maximum tracked products, `None` for no limit
    pub max_products: Option<u32>,
}

/// Free tier: 20 AI uses, 5 products
pub static FREE: Plan = Plan {
    id: PlanId::Free,
    name: "Grátis",
    monthly_price_cents: 0,
    annual_price_cents: None,
    ai_quota: AiQuota::Limited(20),
    max_products: Some(5),
};

/// Pro tier: 150 AI uses, unlimited products
pub static PRO: Plan = Plan {
    id: PlanId::Pro,
    name: "Pro",
    monthly_price_cents: 2_900,
    annual_price_cents: Some(29_000),
    ai_quota: AiQuota::Limited(150),
    max_products: None,
};

/// Premium tier: unlimited everything
pub static PREMIUM: Plan = Plan {
    id: PlanId::Premium,
    name: "Premium",
    monthly_price_cents: 4_900,
    annual_price_cents: Some(49_000),
    ai_quota: AiQuota::Unlimited,
    max_products: None,
};

/// The full catalog in display order
pub fn catalog() -> [&'static Plan; 3] {
    [&FREE, &PRO, &PREMIUM]
}

/// Resolve a stored plan id, falling back to free for ids the catalog no longer knows
pub fn plan_or_free(raw: &str) -> &'static Plan {
    match raw.parse::<PlanId>() {
        Ok(id) => id.plan(),
        Err(_) => {
            tracing::warn!(plan_id = %raw, "Stored plan id not in catalog, resolving to free");
            &FREE
        }
    }
}

impl Plan {
    pub fn product_limit(&self) -> Option<u32> {
        self.max_products
    }
}

/// Plan-gated features
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ProductAnalysis,
    SmartChat,
    AdGeneration,
    TrendInsights,
    CompetitorAnalysis,
    UnlimitedProducts,
}

impl Capability {
    pub const ALL: [Capability; 6] = [
        Capability::ProductAnalysis,
        Capability::SmartChat,
        Capability::AdGeneration,
        Capability::TrendInsights,
        Capability::CompetitorAnalysis,
        Capability::UnlimitedProducts,
    ];
}

/// Single gate for every plan-dependent feature check
pub fn has_capability(plan: &Plan, capability: Capability) -> bool {
    match capability {
        Capability::ProductAnalysis | Capability::SmartChat => true,
        Capability::AdGeneration
        | Capability::TrendInsights
        | Capability::CompetitorAnalysis
        | Capability::UnlimitedProducts => plan.id.is_paid(),
    }
}
