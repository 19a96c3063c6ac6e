#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! VendeAI Shared Module
//!
//! Types every other crate agrees on: the static plan catalog, capability
//! gating, principal/session/subscription records and the persistence seam.

#[cfg(feature = "postgres")]
pub mod db;
pub mod error;
pub mod memory_store;
#[cfg(feature = "postgres")]
pub mod pg_store;
pub mod plans;
pub mod store;
pub mod types;

#[cfg(feature = "postgres")]
pub use db::{create_pool, run_migrations};
pub use error::{StoreError, StoreResult};
pub use memory_store::MemoryStore;
#[cfg(feature = "postgres")]
pub use pg_store::PgStore;
pub use plans::{
    catalog, has_capability, plan_or_free, AiQuota, Capability, Plan, PlanId, RemainingUses,
};
pub use store::Store;
pub use types::{
    ConfirmedPayment, Locale, NewPrincipal, OAuthProvider, PaymentApplication, PaymentRail,
    Principal, ProfileUpdate, Session, Subscription, SubscriptionStatus,
};
