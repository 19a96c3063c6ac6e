#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! VendeAI Client
//!
//! Headless client for the VendeAI API holding the app's session and
//! entitlement state. The server is the only source of quota numbers: the
//! client re-reads the entitlement after every call that can change plan or
//! usage, and never adjusts it locally.
//!
//! ```rust,no_run
//! use vendeai_client::{AiUseOutcome, ClientOptions, VendeAiClient};
//!
//! # async fn example() -> vendeai_client::ClientResult<()> {
//! let client = VendeAiClient::new(ClientOptions::new("http://localhost:3001"))?;
//! client.login("loja@example.com", "senha-segura").await?;
//!
//! match client.attempt_ai_use().await? {
//!     AiUseOutcome::Allowed { remaining } => println!("{remaining} uses left"),
//!     AiUseOutcome::UpgradeRequired => println!("show plans"),
//! }
//! # Ok(())
//! # }
//! ```

mod error;
mod session;
mod types;

pub use error::{ClientError, ClientResult};
pub use session::SessionState;
pub use types::{
    AiUseOutcome, AsyncPayment, AsyncPaymentStatus, CardIntent, EntitlementView, PlanState,
};

use std::sync::Arc;
use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::RwLock;
use vendeai_shared::{PlanId, Principal, Subscription};

use crate::error::ErrorBody;
use crate::types::{
    AiUseResponse, AuthResponse, ConfirmCardRequest, Credentials, PlanRequest,
    SubscriptionEnvelope,
};

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// API origin, e.g. `https://api.vendeai.com.br`
    pub base_url: String,
    pub timeout: Duration,
}

impl ClientOptions {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone)]
pub struct VendeAiClient {
    http: reqwest::Client,
    base_url: String,
    state: Arc<RwLock<SessionState>>,
}

impl VendeAiClient {
    pub fn new(options: ClientOptions) -> ClientResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(options.timeout)
            .build()
            .map_err(ClientError::network)?;
        Ok(Self {
            http,
            base_url: options.base_url.trim_end_matches('/').to_string(),
            state: Arc::new(RwLock::new(SessionState::Anonymous)),
        })
    }

    /// Snapshot of the current session
    pub async fn state(&self) -> SessionState {
        self.state.read().await.clone()
    }

    /// Last entitlement the server reported
    pub async fn entitlement(&self) -> Option<EntitlementView> {
        self.state.read().await.entitlement().cloned()
    }

    // ========================================================================
    // Authentication
    // ========================================================================

    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> ClientResult<Principal> {
        let request = self.http.post(self.url("/api/auth/register")).json(&Credentials {
            email,
            password,
            name: Some(name),
        });
        let response = request.send().await.map_err(ClientError::network)?;
        let auth: AuthResponse = Self::read(response).await?;
        self.establish(auth).await
    }

    pub async fn login(&self, email: &str, password: &str) -> ClientResult<Principal> {
        let request = self.http.post(self.url("/api/auth/login")).json(&Credentials {
            email,
            password,
            name: None,
        });
        let response = request.send().await.map_err(ClientError::network)?;
        let auth: AuthResponse = Self::read(response).await?;
        self.establish(auth).await
    }

    /// End the session. Local state is cleared even when the server call fails.
    pub async fn logout(&self) -> ClientResult<()> {
        let token = match self.state.read().await.token() {
            Some(token) => token.to_string(),
            None => return Ok(()),
        };

        let result = self
            .http
            .post(self.url("/api/auth/logout"))
            .bearer_auth(&token)
            .send()
            .await;
        self.state.write().await.expire(&token);

        match result {
            Ok(resp)
                if resp.status().is_success() || resp.status() == StatusCode::UNAUTHORIZED => {}
            Ok(resp) => tracing::warn!(status = %resp.status(), "Server logout failed"),
            Err(e) => tracing::warn!(error = %e, "Server logout failed"),
        }
        Ok(())
    }

    async fn establish(&self, auth: AuthResponse) -> ClientResult<Principal> {
        let principal = auth.user;
        *self.state.write().await = SessionState::Authenticated {
            token: auth.token,
            principal: principal.clone(),
            entitlement: None,
        };
        tracing::debug!(user_id = %principal.id, "Session established");
        self.refresh_after_mutation().await?;
        Ok(principal)
    }

    // ========================================================================
    // Entitlement and quota
    // ========================================================================

    /// Fetch plan and quota from the server and store them
    pub async fn refresh_entitlement(&self) -> ClientResult<EntitlementView> {
        let token = self.token().await?;
        let view: EntitlementView = self
            .send(&token, self.http.get(self.url("/api/entitlement")))
            .await?;
        self.state.write().await.store_entitlement(&token, view.clone());
        Ok(view)
    }

    /// Reserve one AI use before running an AI action.
    ///
    /// An exhausted snapshot is re-checked against the server first, since a
    /// payment may have landed through a webhook since it was taken.
    pub async fn attempt_ai_use(&self) -> ClientResult<AiUseOutcome> {
        let exhausted = self
            .state
            .read()
            .await
            .entitlement()
            .is_some_and(|e| !e.can_use_ai());
        if exhausted && !self.refresh_entitlement().await?.can_use_ai() {
            return Ok(AiUseOutcome::UpgradeRequired);
        }

        let token = self.token().await?;
        let response: AiUseResponse = self
            .send(&token, self.http.post(self.url("/api/ai/use")))
            .await?;
        self.refresh_after_mutation().await?;

        Ok(if response.allowed {
            AiUseOutcome::Allowed {
                remaining: response.remaining,
            }
        } else {
            AiUseOutcome::UpgradeRequired
        })
    }

    // ========================================================================
    // Payments
    // ========================================================================

    /// Start a card payment; the card SDK confirms it with the client secret
    pub async fn create_card_intent(&self, plan: PlanId) -> ClientResult<CardIntent> {
        self.post("/api/payment/stripe/create-intent", &PlanRequest { plan_id: plan })
            .await
    }

    pub async fn confirm_card_payment(
        &self,
        payment_intent_id: &str,
    ) -> ClientResult<Subscription> {
        let envelope: SubscriptionEnvelope = self
            .post(
                "/api/payment/stripe/confirm",
                &ConfirmCardRequest { payment_intent_id },
            )
            .await?;
        self.refresh_after_mutation().await?;
        envelope
            .subscription
            .ok_or_else(|| ClientError::Deserialization("confirmation without subscription".into()))
    }

    pub async fn create_async_payment(&self, plan: PlanId) -> ClientResult<AsyncPayment> {
        self.post("/api/payment/mercadopago/create-pix", &PlanRequest { plan_id: plan })
            .await
    }

    /// Poll a PIX payment; an approved one is applied server-side by this call
    pub async fn async_payment_status(
        &self,
        payment_id: &str,
    ) -> ClientResult<AsyncPaymentStatus> {
        let token = self.token().await?;
        let url = self.url(&format!("/api/payment/mercadopago/status/{payment_id}"));
        let status: AsyncPaymentStatus = self.send(&token, self.http.get(url)).await?;
        if status.is_approved() {
            self.refresh_after_mutation().await?;
        }
        Ok(status)
    }

    pub async fn subscription(&self) -> ClientResult<Option<Subscription>> {
        let token = self.token().await?;
        let envelope: SubscriptionEnvelope = self
            .send(&token, self.http.get(self.url("/api/payment/subscription")))
            .await?;
        Ok(envelope.subscription)
    }

    pub async fn cancel_subscription(&self) -> ClientResult<Subscription> {
        let token = self.token().await?;
        let envelope: SubscriptionEnvelope = self
            .send(
                &token,
                self.http.post(self.url("/api/payment/subscription/cancel")),
            )
            .await?;
        self.refresh_after_mutation().await?;
        envelope
            .subscription
            .ok_or_else(|| ClientError::Deserialization("cancel without subscription".into()))
    }

    // ========================================================================
    // Internal helpers
    // ========================================================================

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn token(&self) -> ClientResult<String> {
        self.state
            .read()
            .await
            .token()
            .map(str::to_string)
            .ok_or(ClientError::NotAuthenticated)
    }

    /// Re-read the entitlement after a call that may have changed it.
    ///
    /// Only an expired session is an error here. Any other failure drops the
    /// cached snapshot so a stale quota is never shown.
    async fn refresh_after_mutation(&self) -> ClientResult<()> {
        match self.refresh_entitlement().await {
            Ok(_) => Ok(()),
            Err(ClientError::SessionExpired) => Err(ClientError::SessionExpired),
            Err(e) => {
                tracing::warn!(error = %e, "Entitlement refresh failed, clearing snapshot");
                if let SessionState::Authenticated { entitlement, .. } =
                    &mut *self.state.write().await
                {
                    *entitlement = None;
                }
                Ok(())
            }
        }
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> ClientResult<T> {
        let token = self.token().await?;
        self.send(&token, self.http.post(self.url(path)).json(body))
            .await
    }

    /// Send an authenticated request; a 401 ends the session
    async fn send<T: DeserializeOwned>(
        &self,
        token: &str,
        request: RequestBuilder,
    ) -> ClientResult<T> {
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(ClientError::network)?;

        if response.status() == StatusCode::UNAUTHORIZED {
            tracing::info!("Session rejected by server, dropping to anonymous");
            self.state.write().await.expire(token);
            return Err(ClientError::SessionExpired);
        }
        Self::read(response).await
    }

    async fn read<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
        let status = response.status();
        let body = response.text().await.map_err(ClientError::network)?;

        if status.is_success() {
            return serde_json::from_str(&body)
                .map_err(|e| ClientError::Deserialization(format!("{e}: {body}")));
        }

        match serde_json::from_str::<ErrorBody>(&body) {
            Ok(error) => Err(error.into_error(status.as_u16())),
            Err(_) => Err(ClientError::Api {
                status: status.as_u16(),
                message: body,
                action: None,
            }),
        }
    }
}
