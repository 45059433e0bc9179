//! Unified error type for the Mentora session core.

use mentora_heartbeat::HeartbeatError;
use mentora_protocol::ProtocolError;
use mentora_session::SessionError;
use mentora_store::StoreError;
use mentora_token::TokenError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `mentora` meta-crate you deal with this single error
/// type; `?` converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum MentoraError {
    /// Token encoding or decoding failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The document store or local storage failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Device identity, authentication, or session record failure.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Token issuance or refresh failed.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// The heartbeat task is gone.
    #[error(transparent)]
    Heartbeat(#[from] HeartbeatError),
}

impl MentoraError {
    /// Returns `true` if the user has to authenticate again.
    pub fn requires_reauth(&self) -> bool {
        matches!(
            self,
            Self::Token(TokenError::RefreshFailure(_))
                | Self::Session(
                    SessionError::SessionInvalid(_) | SessionError::NotAuthenticated
                )
        )
    }
}
