//! Error types for the token layer.

use mentora_protocol::ProtocolError;
use mentora_session::SessionError;
use mentora_store::StoreError;

/// Errors that can occur while issuing, persisting, or refreshing tokens.
///
/// `Clone` because a single refresh outcome is handed to every caller
/// that joined the in-flight refresh.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TokenError {
    /// The refresh token is missing, expired, or forged, the session is not
    /// live, nobody is signed in, or the user profile is missing.
    ///
    /// Local tokens have already been cleared when this is returned; the
    /// caller must force re-authentication.
    #[error("token refresh failed: {0}")]
    RefreshFailure(String),

    /// Claims could not be encoded or signed.
    #[error("token encoding failed: {0}")]
    Encode(String),

    /// Local token storage failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A session-layer call failed.
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl From<ProtocolError> for TokenError {
    fn from(e: ProtocolError) -> Self {
        Self::Encode(e.to_string())
    }
}

impl TokenError {
    pub(crate) fn refresh(reason: impl Into<String>) -> Self {
        Self::RefreshFailure(reason.into())
    }
}
