//! Local session state
//!
//! The client keeps a single [`SessionState`]. Quota fields inside it are only
//! ever replaced by what the server returned; nothing here counts uses.

use vendeai_shared::Principal;

use crate::types::EntitlementView;

#[derive(Debug, Clone, Default)]
pub enum SessionState {
    #[default]
    Anonymous,
    Authenticated {
        token: String,
        principal: Principal,
        /// `None` until the first successful entitlement fetch
        entitlement: Option<EntitlementView>,
    },
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated { .. })
    }

    pub fn token(&self) -> Option<&str> {
        match self {
            SessionState::Authenticated { token, .. } => Some(token),
            SessionState::Anonymous => None,
        }
    }

    pub fn principal(&self) -> Option<&Principal> {
        match self {
            SessionState::Authenticated { principal, .. } => Some(principal),
            SessionState::Anonymous => None,
        }
    }

    pub fn entitlement(&self) -> Option<&EntitlementView> {
        match self {
            SessionState::Authenticated { entitlement, .. } => entitlement.as_ref(),
            SessionState::Anonymous => None,
        }
    }

    /// Replace the entitlement snapshot if the session still belongs to `token`.
    ///
    /// A logout or re-login that happened while the request was in flight
    /// makes the answer stale, so it is dropped.
    pub(crate) fn store_entitlement(&mut self, for_token: &str, view: EntitlementView) -> bool {
        match self {
            SessionState::Authenticated {
                token, entitlement, ..
            } if token == for_token => {
                *entitlement = Some(view);
                true
            }
            _ => false,
        }
    }

    /// Drop to anonymous if the session still belongs to `token`
    pub(crate) fn expire(&mut self, for_token: &str) {
        if self.token() == Some(for_token) {
            *self = SessionState::Anonymous;
        }
    }
}
