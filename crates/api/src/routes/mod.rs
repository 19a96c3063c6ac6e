//! HTTP routes

pub mod ai;
pub mod auth;
pub mod entitlement;
pub mod health;
pub mod payment;
pub mod user;
pub mod webhooks;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::auth::require_auth;
use crate::state::AppState;

/// Build the full router; callers add CORS and tracing layers
pub fn create_router(state: AppState) -> Router {
    let public = Router::new()
        .route("/health", get(health::health))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/oauth/{provider}", post(auth::oauth_login))
        .route("/webhooks/stripe", post(webhooks::stripe_webhook))
        .route("/webhooks/mercadopago", post(webhooks::mercadopago_webhook));

    let protected = Router::new()
        .route("/api/auth/logout", post(auth::logout))
        .route(
            "/api/user/profile",
            get(user::get_profile).put(user::update_profile),
        )
        .route("/api/entitlement", get(entitlement::get_entitlement))
        .route("/api/ai/use", post(ai::use_ai))
        .route("/api/ai/complete", post(ai::complete))
        .route(
            "/api/payment/stripe/create-intent",
            post(payment::create_card_intent),
        )
        .route("/api/payment/stripe/confirm", post(payment::confirm_card_payment))
        .route(
            "/api/payment/mercadopago/create-pix",
            post(payment::create_pix_payment),
        )
        .route(
            "/api/payment/mercadopago/status/{payment_id}",
            get(payment::pix_payment_status),
        )
        .route("/api/payment/subscription", get(payment::get_subscription))
        .route(
            "/api/payment/subscription/cancel",
            post(payment::cancel_subscription),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    public.merge(protected).with_state(state)
}
