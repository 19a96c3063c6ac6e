//! API error type and its HTTP mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use vendeai_billing::{BillingError, ErrorClass};
use vendeai_shared::StoreError;

use crate::ai::AiError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Validation error: {0}")]
    Validation(String),

    /// Bad credentials or a dead session; the user has to log in again
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The caller is authenticated but may not touch this resource
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Plan-gated feature; the user has to upgrade
    #[error("Upgrade required: {0}")]
    UpgradeRequired(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Upstream provider error: {0}")]
    Upstream(String),

    #[error("{0} is not configured")]
    Unavailable(&'static str),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) | ApiError::UpgradeRequired(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Call to action shown next to the message, if any
    pub fn action(&self) -> Option<&'static str> {
        match self {
            ApiError::Authentication(_) => Some("login_again"),
            ApiError::UpgradeRequired(_) => Some("upgrade_plan"),
            ApiError::Upstream(_) => Some("retry_later"),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Upstream(detail) => {
                tracing::warn!(error = %detail, "Upstream provider failure");
                "Service temporarily unavailable, try again later".to_string()
            }
            ApiError::Internal(detail) => {
                tracing::error!(error = %detail, "Internal error");
                "Internal server error".to_string()
            }
            ApiError::Validation(m)
            | ApiError::Authentication(m)
            | ApiError::Forbidden(m)
            | ApiError::UpgradeRequired(m)
            | ApiError::NotFound(m)
            | ApiError::Conflict(m) => m.clone(),
            ApiError::Unavailable(_) => self.to_string(),
        };

        let mut body = json!({
            "error": message,
            "code": status.as_u16(),
        });
        if let Some(action) = self.action() {
            body["action"] = json!(action);
        }

        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(m) => ApiError::NotFound(m),
            StoreError::Conflict(m) => ApiError::Conflict(m),
            StoreError::Corrupt(_) | StoreError::Database(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<BillingError> for ApiError {
    fn from(e: BillingError) -> Self {
        let message = e.to_string();
        match e.class() {
            ErrorClass::Authentication => ApiError::Authentication(message),
            ErrorClass::Authorization => ApiError::Forbidden(message),
            ErrorClass::Validation => ApiError::Validation(message),
            ErrorClass::UpstreamProvider => ApiError::Upstream(message),
            ErrorClass::Conflict => ApiError::Conflict(message),
            ErrorClass::NotFound => ApiError::NotFound(message),
            ErrorClass::Fatal => ApiError::Internal(message),
        }
    }
}

impl From<AiError> for ApiError {
    fn from(e: AiError) -> Self {
        ApiError::Upstream(e.to_string())
    }
}
