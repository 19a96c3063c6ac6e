//! Postgres-backed [`Store`]
//!
//! Atomicity comes from the database: payment application runs in one transaction
//! claiming the rail reference first, and the usage counter is a single conditional
//! upsert so concurrent requests cannot both pass the quota check.

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::store::Store;
use crate::types::{
    ConfirmedPayment, NewPrincipal, OAuthProvider, PaymentApplication, PaymentRail, Principal,
    ProfileUpdate, Session, Subscription,
};

const USER_COLUMNS: &str = "id, email, name, avatar, locale, password_hash, oauth_provider, \
     oauth_provider_id, email_verified, created_at, updated_at";

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, plan_id, status, current_period_start, \
     current_period_end, card_payment_ref, async_payment_ref, canceled_at, created_at, updated_at";

/// Database row type for users
#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    name: String,
    avatar: Option<String>,
    locale: String,
    password_hash: Option<String>,
    oauth_provider: Option<String>,
    oauth_provider_id: Option<String>,
    email_verified: bool,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<UserRow> for Principal {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let oauth_provider = row
            .oauth_provider
            .map(|p| p.parse::<OAuthProvider>())
            .transpose()
            .map_err(StoreError::Corrupt)?;
        Ok(Principal {
            id: row.id,
            email: row.email,
            name: row.name,
            avatar: row.avatar,
            locale: row.locale.parse().map_err(StoreError::Corrupt)?,
            password_hash: row.password_hash,
            oauth_provider,
            oauth_provider_id: row.oauth_provider_id,
            email_verified: row.email_verified,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Database row type for subscriptions
#[derive(Debug, FromRow)]
struct SubscriptionRow {
    id: Uuid,
    user_id: Uuid,
    plan_id: String,
    status: String,
    current_period_start: Option<OffsetDateTime>,
    current_period_end: Option<OffsetDateTime>,
    card_payment_ref: Option<String>,
    async_payment_ref: Option<String>,
    canceled_at: Option<OffsetDateTime>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = StoreError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        Ok(Subscription {
            id: row.id,
            user_id: row.user_id,
            plan_id: row.plan_id,
            status: row.status.parse().map_err(StoreError::Corrupt)?,
            current_period_start: row.current_period_start,
            current_period_end: row.current_period_end,
            card_payment_ref: row.card_payment_ref,
            async_payment_ref: row.async_payment_ref,
            canceled_at: row.canceled_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Database row type for sessions
#[derive(Debug, FromRow)]
struct SessionRow {
    token_id: String,
    user_id: Uuid,
    created_at: OffsetDateTime,
    expires_at: OffsetDateTime,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Session {
            token_id: row.token_id,
            user_id: row.user_id,
            created_at: row.created_at,
            expires_at: row.expires_at,
        }
    }
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_user(&self, column: &str, value: &str) -> StoreResult<Option<Principal>> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE {column} = $1"
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Principal::try_from).transpose()
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_principal(&self, new: NewPrincipal) -> StoreResult<Principal> {
        let mut tx = self.pool.begin().await?;
        let (oauth_provider, oauth_provider_id) = match &new.oauth {
            Some((provider, id)) => (Some(provider.as_str()), Some(id.as_str())),
            None => (None, None),
        };

        let row: UserRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO users (
                id, email, name, avatar, locale, password_hash,
                oauth_provider, oauth_provider_id, email_verified, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, 'pt', $5, $6, $7, $8, NOW(), NOW())
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&new.email)
        .bind(&new.name)
        .bind(&new.avatar)
        .bind(&new.password_hash)
        .bind(oauth_provider)
        .bind(oauth_provider_id)
        .bind(new.email_verified)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO subscriptions (id, user_id, plan_id, status, created_at, updated_at)
            VALUES ($1, $2, 'free', 'active', NOW(), NOW())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(row.id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO ai_usage (user_id, used, updated_at) VALUES ($1, 0, NOW())")
            .bind(row.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Principal::try_from(row)
    }

    async fn find_principal(&self, id: Uuid) -> StoreResult<Option<Principal>> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Principal::try_from).transpose()
    }

    async fn find_principal_by_email(&self, email: &str) -> StoreResult<Option<Principal>> {
        self.fetch_user("email", email).await
    }

    async fn find_principal_by_oauth(
        &self,
        provider: OAuthProvider,
        provider_id: &str,
    ) -> StoreResult<Option<Principal>> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE oauth_provider = $1 AND oauth_provider_id = $2"
        ))
        .bind(provider.as_str())
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Principal::try_from).transpose()
    }

    async fn link_oauth_identity(
        &self,
        id: Uuid,
        provider: OAuthProvider,
        provider_id: &str,
    ) -> StoreResult<Principal> {
        let row: UserRow = sqlx::query_as(&format!(
            r#"
            UPDATE users
            SET oauth_provider = $2,
                oauth_provider_id = $3,
                email_verified = TRUE,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(provider.as_str())
        .bind(provider_id)
        .fetch_one(&self.pool)
        .await?;
        Principal::try_from(row)
    }

    async fn update_profile(&self, id: Uuid, update: ProfileUpdate) -> StoreResult<Principal> {
        let row: UserRow = sqlx::query_as(&format!(
            r#"
            UPDATE users
            SET name = COALESCE($2, name),
                avatar = COALESCE($3, avatar),
                locale = COALESCE($4, locale),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(update.name)
        .bind(update.avatar)
        .bind(update.locale.map(|l| l.as_str()))
        .fetch_one(&self.pool)
        .await?;
        Principal::try_from(row)
    }

    async fn insert_session(&self, session: &Session) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (token_id, user_id, created_at, expires_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&session.token_id)
        .bind(session.user_id)
        .bind(session.created_at)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_session(&self, token_id: &str) -> StoreResult<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as(
            "SELECT token_id, user_id, created_at, expires_at FROM sessions WHERE token_id = $1",
        )
        .bind(token_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Session::from))
    }

    async fn delete_session(&self, token_id: &str) -> StoreResult<bool> {
        let rows_affected = sqlx::query("DELETE FROM sessions WHERE token_id = $1")
            .bind(token_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(rows_affected > 0)
    }

    async fn get_subscription(&self, user_id: Uuid) -> StoreResult<Option<Subscription>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Subscription::try_from).transpose()
    }

    async fn apply_payment(&self, payment: &ConfirmedPayment) -> StoreResult<PaymentApplication> {
        let mut tx = self.pool.begin().await?;

        // Claim the reference; a conflicting claim (replay or concurrent duplicate) blocks
        // until the first transaction commits and then returns no row.
        let claimed: Option<(String,)> = sqlx::query_as(
            r#"
            INSERT INTO applied_payments (rail, reference, user_id, plan_id, applied_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (rail, reference) DO NOTHING
            RETURNING reference
            "#,
        )
        .bind(payment.rail.name())
        .bind(payment.rail.reference())
        .bind(payment.user_id)
        .bind(payment.plan_id.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        if claimed.is_none() {
            tx.commit().await?;
            tracing::info!(
                user_id = %payment.user_id,
                rail = payment.rail.name(),
                reference = %payment.rail.reference(),
                "Payment reference already applied, leaving subscription unchanged"
            );
            let subscription = self.get_subscription(payment.user_id).await?.ok_or_else(|| {
                StoreError::NotFound(format!("subscription {}", payment.user_id))
            })?;
            return Ok(PaymentApplication {
                subscription,
                applied: false,
            });
        }

        let (card_payment_ref, async_payment_ref) = match &payment.rail {
            PaymentRail::Card(r) => (Some(r.as_str()), None),
            PaymentRail::Async(r) => (None, Some(r.as_str())),
        };

        let row: SubscriptionRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO subscriptions (
                id, user_id, plan_id, status, current_period_start, current_period_end,
                card_payment_ref, async_payment_ref, canceled_at, created_at, updated_at
            ) VALUES ($1, $2, $3, 'active', $4, $5, $6, $7, NULL, NOW(), NOW())
            ON CONFLICT (user_id) DO UPDATE SET
                plan_id = EXCLUDED.plan_id,
                status = 'active',
                current_period_start = EXCLUDED.current_period_start,
                current_period_end = EXCLUDED.current_period_end,
                card_payment_ref = EXCLUDED.card_payment_ref,
                async_payment_ref = EXCLUDED.async_payment_ref,
                canceled_at = NULL,
                updated_at = NOW()
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(payment.user_id)
        .bind(payment.plan_id.as_str())
        .bind(payment.period_start)
        .bind(payment.period_end)
        .bind(card_payment_ref)
        .bind(async_payment_ref)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO ai_usage (user_id, used, updated_at) VALUES ($1, 0, NOW())
            ON CONFLICT (user_id) DO UPDATE SET used = 0, updated_at = NOW()
            "#,
        )
        .bind(payment.user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(PaymentApplication {
            subscription: Subscription::try_from(row)?,
            applied: true,
        })
    }

    async fn cancel_subscription(
        &self,
        user_id: Uuid,
        canceled_at: OffsetDateTime,
    ) -> StoreResult<Option<Subscription>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            r#"
            UPDATE subscriptions
            SET status = 'canceled',
                canceled_at = $2,
                updated_at = NOW()
            WHERE user_id = $1
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(canceled_at)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Subscription::try_from).transpose()
    }

    async fn ai_usage(&self, user_id: Uuid) -> StoreResult<u32> {
        let used: Option<(i32,)> = sqlx::query_as("SELECT used FROM ai_usage WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(used.map(|(n,)| n.max(0) as u32).unwrap_or(0))
    }

    async fn try_consume_ai_use(
        &self,
        user_id: Uuid,
        quota: Option<u32>,
    ) -> StoreResult<Option<u32>> {
        if quota == Some(0) {
            return Ok(None);
        }
        let quota = quota.map(|q| i32::try_from(q).unwrap_or(i32::MAX));

        // ON CONFLICT DO UPDATE locks the row and evaluates the WHERE against its latest
        // version, so the quota check and the increment cannot interleave.
        let used: Option<(i32,)> = sqlx::query_as(
            r#"
            INSERT INTO ai_usage (user_id, used, updated_at) VALUES ($1, 1, NOW())
            ON CONFLICT (user_id) DO UPDATE SET
                used = ai_usage.used + 1,
                updated_at = NOW()
            WHERE $2::INTEGER IS NULL OR ai_usage.used < $2::INTEGER
            RETURNING used
            "#,
        )
        .bind(user_id)
        .bind(quota)
        .fetch_optional(&self.pool)
        .await?;

        Ok(used.map(|(n,)| n.max(0) as u32))
    }

    async fn release_ai_use(&self, user_id: Uuid) -> StoreResult<u32> {
        let used: Option<(i32,)> = sqlx::query_as(
            r#"
            UPDATE ai_usage
            SET used = GREATEST(used - 1, 0),
                updated_at = NOW()
            WHERE user_id = $1
            RETURNING used
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(used.map(|(n,)| n.max(0) as u32).unwrap_or(0))
    }
}
