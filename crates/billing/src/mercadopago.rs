//! Async/QR rail: Mercado Pago PIX client

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};

const DEFAULT_BASE_URL: &str = "https://api.mercadopago.com";
const DEFAULT_TTL_MINUTES: i64 = 30;

/// Mercado Pago configuration
#[derive(Debug, Clone)]
pub struct MercadoPagoConfig {
    pub access_token: String,
    pub webhook_secret: String,
    pub notification_url: Option<String>,
    pub base_url: String,
    pub payment_ttl_minutes: i64,
}

impl MercadoPagoConfig {
    pub fn from_env() -> BillingResult<Self> {
        let access_token = std::env::var("MERCADOPAGO_ACCESS_TOKEN")
            .map_err(|_| BillingError::Config("MERCADOPAGO_ACCESS_TOKEN not set".to_string()))?;
        let webhook_secret = std::env::var("MERCADOPAGO_WEBHOOK_SECRET")
            .map_err(|_| BillingError::Config("MERCADOPAGO_WEBHOOK_SECRET not set".to_string()))?;
        let payment_ttl_minutes = match std::env::var("MERCADOPAGO_PAYMENT_TTL_MINUTES") {
            Ok(raw) => raw.parse::<i64>().ok().filter(|m| *m > 0).ok_or_else(|| {
                BillingError::Config(format!("MERCADOPAGO_PAYMENT_TTL_MINUTES invalid: {raw}"))
            })?,
            Err(_) => DEFAULT_TTL_MINUTES,
        };

        Ok(Self {
            access_token,
            webhook_secret,
            notification_url: std::env::var("MERCADOPAGO_NOTIFICATION_URL").ok(),
            base_url: std::env::var("MERCADOPAGO_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            payment_ttl_minutes,
        })
    }

    pub fn payment_ttl(&self) -> time::Duration {
        time::Duration::minutes(self.payment_ttl_minutes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncPaymentStatus {
    Pending,
    Approved,
    /// Rejected, cancelled, refunded, expired or anything else terminal
    Other,
}

impl AsyncPaymentStatus {
    pub fn from_provider(raw: &str) -> Self {
        match raw {
            "pending" | "in_process" | "authorized" => AsyncPaymentStatus::Pending,
            "approved" => AsyncPaymentStatus::Approved,
            _ => AsyncPaymentStatus::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AsyncPaymentStatus::Pending => "pending",
            AsyncPaymentStatus::Approved => "approved",
            AsyncPaymentStatus::Other => "other",
        }
    }
}

/// What the orchestrator asks the provider to create
#[derive(Debug, Clone)]
pub struct AsyncPaymentRequest {
    pub amount_cents: i64,
    pub description: String,
    pub payer_email: String,
    pub external_reference: String,
    pub expires_at: OffsetDateTime,
}

/// Provider-neutral view of an async/QR payment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsyncPayment {
    pub id: String,
    pub status: AsyncPaymentStatus,
    pub external_reference: Option<String>,
    pub qr_code: Option<String>,
    pub qr_code_base64: Option<String>,
    pub expires_at: Option<OffsetDateTime>,
    pub approved_at: Option<OffsetDateTime>,
}

/// Async/QR payment provider
#[async_trait]
pub trait AsyncGateway: Send + Sync {
    /// Create a payment; `external_reference` doubles as the idempotency key
    async fn create_payment(&self, request: AsyncPaymentRequest) -> BillingResult<AsyncPayment>;

    async fn get_payment(&self, payment_id: &str) -> BillingResult<AsyncPayment>;
}

#[derive(Clone)]
pub struct MercadoPagoClient {
    http: reqwest::Client,
    config: MercadoPagoConfig,
}

#[derive(Serialize)]
struct CreatePaymentBody<'a> {
    transaction_amount: f64,
    description: &'a str,
    payment_method_id: &'static str,
    external_reference: &'a str,
    date_of_expiration: String,
    payer: Payer<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    notification_url: Option<&'a str>,
}

#[derive(Serialize)]
struct Payer<'a> {
    email: &'a str,
}

#[derive(Deserialize)]
struct PaymentResponse {
    id: u64,
    status: String,
    external_reference: Option<String>,
    date_of_expiration: Option<String>,
    date_approved: Option<String>,
    point_of_interaction: Option<PointOfInteraction>,
}

#[derive(Deserialize)]
struct PointOfInteraction {
    transaction_data: Option<TransactionData>,
}

#[derive(Deserialize)]
struct TransactionData {
    qr_code: Option<String>,
    qr_code_base64: Option<String>,
}

/// `2024-05-01T12:30:00.000-03:00`, the format the provider sends and expects
fn format_provider_date(at: OffsetDateTime) -> BillingResult<String> {
    at.format(format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3][offset_hour sign:mandatory]:[offset_minute]"
    ))
    .map_err(|e| BillingError::UpstreamRejected(format!("cannot format date: {e}")))
}

fn parse_provider_date(raw: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(raw, &Rfc3339).ok()
}

impl From<PaymentResponse> for AsyncPayment {
    fn from(resp: PaymentResponse) -> Self {
        let data = resp
            .point_of_interaction
            .and_then(|p| p.transaction_data);
        let (qr_code, qr_code_base64) = match data {
            Some(d) => (d.qr_code, d.qr_code_base64),
            None => (None, None),
        };
        Self {
            id: resp.id.to_string(),
            status: AsyncPaymentStatus::from_provider(&resp.status),
            external_reference: resp.external_reference,
            qr_code,
            qr_code_base64,
            expires_at: resp.date_of_expiration.as_deref().and_then(parse_provider_date),
            approved_at: resp.date_approved.as_deref().and_then(parse_provider_date),
        }
    }
}

impl MercadoPagoClient {
    pub fn new(config: MercadoPagoConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &MercadoPagoConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }
}

async fn read_payment(response: reqwest::Response) -> BillingResult<AsyncPayment> {
    let status = response.status();
    if status.is_server_error() {
        return Err(BillingError::Upstream(format!("mercadopago {status}")));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(BillingError::UpstreamRejected(format!(
            "mercadopago {status}: {body}"
        )));
    }
    let payment: PaymentResponse = response
        .json()
        .await
        .map_err(|e| BillingError::UpstreamRejected(format!("mercadopago body: {e}")))?;
    Ok(payment.into())
}

#[async_trait]
impl AsyncGateway for MercadoPagoClient {
    async fn create_payment(&self, request: AsyncPaymentRequest) -> BillingResult<AsyncPayment> {
        let body = CreatePaymentBody {
            transaction_amount: request.amount_cents as f64 / 100.0,
            description: &request.description,
            payment_method_id: "pix",
            external_reference: &request.external_reference,
            date_of_expiration: format_provider_date(request.expires_at)?,
            payer: Payer {
                email: &request.payer_email,
            },
            notification_url: self.config.notification_url.as_deref(),
        };

        let response = self
            .http
            .post(self.url("/v1/payments"))
            .bearer_auth(&self.config.access_token)
            .header("X-Idempotency-Key", &request.external_reference)
            .json(&body)
            .send()
            .await?;

        let payment = read_payment(response).await?;
        tracing::debug!(
            payment_id = %payment.id,
            external_reference = %request.external_reference,
            "Created PIX payment"
        );
        Ok(payment)
    }

    async fn get_payment(&self, payment_id: &str) -> BillingResult<AsyncPayment> {
        if payment_id.is_empty() || !payment_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(BillingError::InvalidReference(format!(
                "not a payment id: {payment_id}"
            )));
        }
        let response = self
            .http
            .get(self.url(&format!("/v1/payments/{payment_id}")))
            .bearer_auth(&self.config.access_token)
            .send()
            .await?;
        read_payment(response).await
    }
}
