//! Persistence seam
//!
//! Every mutation that touches more than one row is a single call on this trait
//! so implementations can make it atomic: the Postgres store uses a transaction
//! or a conditional statement, the memory store holds one lock for the call.

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::types::{
    ConfirmedPayment, NewPrincipal, OAuthProvider, PaymentApplication, Principal, ProfileUpdate,
    Session, Subscription,
};

#[async_trait]
pub trait Store: Send + Sync {
    /// Create a principal together with its free subscription and a zero usage counter.
    ///
    /// Fails with `StoreError::Conflict` when the e-mail or oauth identity is taken.
    async fn create_principal(&self, new: NewPrincipal) -> StoreResult<Principal>;

    async fn find_principal(&self, id: Uuid) -> StoreResult<Option<Principal>>;

    async fn find_principal_by_email(&self, email: &str) -> StoreResult<Option<Principal>>;

    async fn find_principal_by_oauth(
        &self,
        provider: OAuthProvider,
        provider_id: &str,
    ) -> StoreResult<Option<Principal>>;

    /// Attach an oauth identity to an existing principal
    async fn link_oauth_identity(
        &self,
        id: Uuid,
        provider: OAuthProvider,
        provider_id: &str,
    ) -> StoreResult<Principal>;

    async fn update_profile(&self, id: Uuid, update: ProfileUpdate) -> StoreResult<Principal>;

    async fn insert_session(&self, session: &Session) -> StoreResult<()>;

    async fn find_session(&self, token_id: &str) -> StoreResult<Option<Session>>;

    /// Returns false when no such session existed
    async fn delete_session(&self, token_id: &str) -> StoreResult<bool>;

    async fn get_subscription(&self, user_id: Uuid) -> StoreResult<Option<Subscription>>;

    /// Commit a confirmed payment.
    ///
    /// The first application of a rail reference overwrites the principal's
    /// subscription and resets the usage counter. Later applications of the same
    /// reference return the stored subscription with `applied = false` and change
    /// nothing.
    async fn apply_payment(&self, payment: &ConfirmedPayment) -> StoreResult<PaymentApplication>;

    /// Mark the subscription canceled; `None` when the principal has none
    async fn cancel_subscription(
        &self,
        user_id: Uuid,
        canceled_at: OffsetDateTime,
    ) -> StoreResult<Option<Subscription>>;

    async fn ai_usage(&self, user_id: Uuid) -> StoreResult<u32>;

    /// Increment the usage counter only while it is below `quota`.
    ///
    /// `quota = None` means unlimited. Returns the new counter on success and
    /// `None` when the quota is exhausted. Check and increment are one atomic step.
    async fn try_consume_ai_use(&self, user_id: Uuid, quota: Option<u32>)
        -> StoreResult<Option<u32>>;

    /// Give back one use reserved by a failed action; never goes below zero
    async fn release_ai_use(&self, user_id: Uuid) -> StoreResult<u32>;
}
