//! Server-side session records
//!
//! A token is only honoured while its row exists in `sessions`. Logout deletes
//! the row; expiry is checked on every lookup rather than purged.

use time::OffsetDateTime;
use uuid::Uuid;
use vendeai_shared::{Session, Store};

use crate::error::ApiResult;

/// Save a new session right after its token was signed.
///
/// Earlier sessions of the same principal stay valid.
pub async fn save_session(store: &dyn Store, session: &Session) -> ApiResult<()> {
    store.insert_session(session).await?;
    tracing::debug!(
        user_id = %session.user_id,
        expires_at = %session.expires_at,
        "Session saved"
    );
    Ok(())
}

/// A session is valid when its row exists, belongs to the token's subject and
/// has not expired.
pub async fn is_session_valid(
    store: &dyn Store,
    jti: &str,
    expected_user_id: Uuid,
    now: OffsetDateTime,
) -> ApiResult<bool> {
    let Some(session) = store.find_session(jti).await? else {
        return Ok(false);
    };

    if session.user_id != expected_user_id {
        tracing::warn!(
            token_user = %expected_user_id,
            session_user = %session.user_id,
            "Session belongs to another principal"
        );
        return Ok(false);
    }

    Ok(!session.is_expired_at(now))
}

/// Delete a session; returns false when it was already gone
pub async fn revoke_session(store: &dyn Store, jti: &str) -> ApiResult<bool> {
    let removed = store.delete_session(jti).await?;
    if removed {
        tracing::info!("Session revoked");
    }
    Ok(removed)
}
