// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![cfg(feature = "postgres")]

//! `PgStore` against a real database.
//!
//! Run with `DATABASE_URL=postgres://... cargo test -p vendeai-shared -- --ignored`.

use std::sync::Arc;

use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;
use vendeai_shared::{
    create_pool, run_migrations, ConfirmedPayment, NewPrincipal, PaymentRail, PgStore, PlanId,
    Store,
};

/// Setup test database pool with the schema applied
async fn setup_test_pool() -> PgPool {
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgresql://localhost/vendeai_test".to_string());

    let pool = create_pool(&database_url)
        .await
        .expect("Failed to connect to test database");
    run_migrations(&pool).await.expect("Failed to run migrations");
    pool
}

/// Create a principal with its free subscription and zero usage row
async fn create_test_user(store: &PgStore) -> Uuid {
    let id = Uuid::new_v4();
    store
        .create_principal(NewPrincipal {
            email: format!("pg-{id}@example.com"),
            name: "Loja Postgres".to_string(),
            avatar: None,
            password_hash: Some("TEST_HASH".to_string()),
            oauth: None,
            email_verified: false,
        })
        .await
        .expect("Failed to create test user")
        .id
}

fn payment(
    user_id: Uuid,
    plan_id: PlanId,
    rail: PaymentRail,
    start: OffsetDateTime,
) -> ConfirmedPayment {
    ConfirmedPayment {
        user_id,
        plan_id,
        rail,
        period_start: start,
        period_end: start + Duration::days(30),
    }
}

async fn subscription_rows(pool: &PgPool, user_id: Uuid) -> i64 {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM subscriptions WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(pool)
        .await
        .unwrap();
    count
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_concurrent_ai_uses_stop_at_quota() {
    const CALLS: usize = 12;
    let quota = (CALLS - 1) as u32;

    let pool = setup_test_pool().await;
    let store = Arc::new(PgStore::new(pool));
    let user_id = create_test_user(&store).await;

    let handles: Vec<_> = (0..CALLS)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.try_consume_ai_use(user_id, Some(quota)).await })
        })
        .collect();

    let mut granted = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().is_some() {
            granted += 1;
        }
    }

    assert_eq!(granted, CALLS - 1);
    assert_eq!(store.ai_usage(user_id).await.unwrap(), quota);
    assert_eq!(store.try_consume_ai_use(user_id, Some(quota)).await.unwrap(), None);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_release_never_goes_below_zero() {
    let pool = setup_test_pool().await;
    let store = PgStore::new(pool);
    let user_id = create_test_user(&store).await;

    assert_eq!(store.try_consume_ai_use(user_id, Some(20)).await.unwrap(), Some(1));
    assert_eq!(store.release_ai_use(user_id).await.unwrap(), 0);
    assert_eq!(store.release_ai_use(user_id).await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_replayed_payment_keeps_period_and_usage() {
    let pool = setup_test_pool().await;
    let store = PgStore::new(pool.clone());
    let user_id = create_test_user(&store).await;

    let first_start = OffsetDateTime::now_utc();
    let rail = PaymentRail::Card(format!("pi_{}", Uuid::new_v4().simple()));
    let first = store
        .apply_payment(&payment(user_id, PlanId::Pro, rail.clone(), first_start))
        .await
        .unwrap();
    assert!(first.applied);
    assert_eq!(first.subscription.plan_id, "pro");

    for _ in 0..3 {
        store.try_consume_ai_use(user_id, Some(150)).await.unwrap();
    }

    // Same reference delivered again later, e.g. webhook after client confirm
    let replay = store
        .apply_payment(&payment(
            user_id,
            PlanId::Pro,
            rail,
            first_start + Duration::days(2),
        ))
        .await
        .unwrap();

    assert!(!replay.applied);
    assert_eq!(
        replay.subscription.current_period_end,
        first.subscription.current_period_end
    );
    assert_eq!(store.ai_usage(user_id).await.unwrap(), 3);
    assert_eq!(subscription_rows(&pool, user_id).await, 1);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_new_payment_resets_usage_in_same_commit() {
    let pool = setup_test_pool().await;
    let store = PgStore::new(pool);
    let user_id = create_test_user(&store).await;

    for _ in 0..20 {
        store.try_consume_ai_use(user_id, Some(20)).await.unwrap();
    }
    assert_eq!(store.try_consume_ai_use(user_id, Some(20)).await.unwrap(), None);

    let rail = PaymentRail::Card(format!("pi_{}", Uuid::new_v4().simple()));
    store
        .apply_payment(&payment(user_id, PlanId::Pro, rail, OffsetDateTime::now_utc()))
        .await
        .unwrap();

    assert_eq!(store.ai_usage(user_id).await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_async_payment_replaces_card_reference() {
    let pool = setup_test_pool().await;
    let store = PgStore::new(pool.clone());
    let user_id = create_test_user(&store).await;
    let now = OffsetDateTime::now_utc();

    let card = PaymentRail::Card(format!("pi_{}", Uuid::new_v4().simple()));
    store
        .apply_payment(&payment(user_id, PlanId::Pro, card, now))
        .await
        .unwrap();

    let pix_id = Uuid::new_v4().simple().to_string();
    let upgraded = store
        .apply_payment(&payment(
            user_id,
            PlanId::Premium,
            PaymentRail::Async(pix_id.clone()),
            now + Duration::minutes(5),
        ))
        .await
        .unwrap();

    assert!(upgraded.applied);
    assert_eq!(upgraded.subscription.plan_id, "premium");
    assert_eq!(upgraded.subscription.card_payment_ref, None);
    assert_eq!(upgraded.subscription.async_payment_ref, Some(pix_id));
    assert_eq!(subscription_rows(&pool, user_id).await, 1);

    let (card_refs,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM subscriptions WHERE user_id = $1 AND card_payment_ref IS NULL",
    )
    .bind(user_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(card_refs, 1);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_concurrent_duplicate_apply_commits_once() {
    let pool = setup_test_pool().await;
    let store = Arc::new(PgStore::new(pool.clone()));
    let user_id = create_test_user(&store).await;
    let rail = PaymentRail::Async(Uuid::new_v4().simple().to_string());
    let start = OffsetDateTime::now_utc();

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let store = store.clone();
            let p = payment(user_id, PlanId::Premium, rail.clone(), start + Duration::seconds(i));
            tokio::spawn(async move { store.apply_payment(&p).await })
        })
        .collect();

    let mut applied = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().applied {
            applied += 1;
        }
    }

    assert_eq!(applied, 1);
    assert_eq!(subscription_rows(&pool, user_id).await, 1);
}
