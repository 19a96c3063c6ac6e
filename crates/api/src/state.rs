//! Application state

use std::sync::Arc;

use vendeai_billing::{BillingConfig, BillingService, EntitlementResolver, QuotaGuard};
use vendeai_shared::Store;

use crate::{
    ai::{AiProvider, GeminiProvider},
    auth::{IdentityService, JwtManager, OAuthVerifier},
    config::Config,
    error::{ApiError, ApiResult},
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Arc<Config>,
    pub identity: IdentityService,
    pub oauth: Arc<dyn OAuthVerifier>,
    pub entitlements: EntitlementResolver,
    pub quota: QuotaGuard,
    /// Payment rails and webhooks; `None` when billing is disabled or not configured
    pub billing: Option<BillingService>,
    /// `None` when no AI key is configured
    pub ai: Option<Arc<dyn AiProvider>>,
}

impl AppState {
    /// Wire the state from explicit collaborators
    pub fn new(
        store: Arc<dyn Store>,
        config: Config,
        oauth: Arc<dyn OAuthVerifier>,
        billing: Option<BillingService>,
        ai: Option<Arc<dyn AiProvider>>,
    ) -> Self {
        let identity = IdentityService::new(store.clone(), JwtManager::new(&config.jwt_secret));
        Self {
            entitlements: EntitlementResolver::new(store.clone()),
            quota: QuotaGuard::new(store.clone()),
            identity,
            oauth,
            billing,
            ai,
            config: Arc::new(config),
            store,
        }
    }

    /// Wire the state from the environment, degrading optional services
    pub fn from_config(
        store: Arc<dyn Store>,
        config: Config,
        oauth: Arc<dyn OAuthVerifier>,
    ) -> Self {
        let billing = if config.enable_billing {
            match BillingConfig::from_env() {
                Ok(billing_config) => {
                    tracing::info!("Billing service initialized");
                    Some(BillingService::new(store.clone(), billing_config))
                }
                Err(e) => {
                    tracing::warn!("Billing not configured: {}", e);
                    None
                }
            }
        } else {
            tracing::info!("Billing disabled via config (ENABLE_BILLING=false)");
            None
        };

        let ai: Option<Arc<dyn AiProvider>> = match &config.gemini_api_key {
            Some(key) => match GeminiProvider::new(key, &config.gemini_model) {
                Ok(provider) => {
                    tracing::info!(model = %config.gemini_model, "AI provider initialized");
                    Some(Arc::new(provider))
                }
                Err(e) => {
                    tracing::warn!("AI provider unavailable: {}", e);
                    None
                }
            },
            None => {
                tracing::warn!("AI provider not configured (missing GEMINI_API_KEY)");
                None
            }
        };

        Self::new(store, config, oauth, billing, ai)
    }

    pub fn billing(&self) -> ApiResult<&BillingService> {
        self.billing.as_ref().ok_or(ApiError::Unavailable("Billing"))
    }

    pub fn ai(&self) -> ApiResult<&Arc<dyn AiProvider>> {
        self.ai.as_ref().ok_or(ApiError::Unavailable("AI provider"))
    }
}
