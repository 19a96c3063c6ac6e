//! Client error types

use serde::Deserialize;
use thiserror::Error;

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The server no longer accepts the session; local state was reset
    #[error("session expired, log in again")]
    SessionExpired,

    /// Operation needs a session and there is none
    #[error("not logged in")]
    NotAuthenticated,

    /// Plan does not allow the action
    #[error("upgrade required: {0}")]
    UpgradeRequired(String),

    /// Any other non-success answer from the API
    #[error("API error {status}: {message}")]
    Api {
        status: u16,
        message: String,
        action: Option<String>,
    },

    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected response: {0}")]
    Deserialization(String),
}

impl ClientError {
    pub fn network(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::SessionExpired => Some(401),
            Self::UpgradeRequired(_) => Some(403),
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the UI should offer a plan upgrade
    pub fn wants_upgrade(&self) -> bool {
        match self {
            Self::UpgradeRequired(_) => true,
            Self::Api { action, .. } => action.as_deref() == Some("upgrade_plan"),
            _ => false,
        }
    }
}

/// JSON body of every API error
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub error: String,
    #[serde(default)]
    pub action: Option<String>,
}

impl ErrorBody {
    /// Map a non-success status and its body; 401 is handled by the caller
    pub(crate) fn into_error(self, status: u16) -> ClientError {
        if status == 403 && self.action.as_deref() == Some("upgrade_plan") {
            return ClientError::UpgradeRequired(self.error);
        }
        ClientError::Api {
            status,
            message: self.error,
            action: self.action,
        }
    }
}
