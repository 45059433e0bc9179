//! Error types for the session layer.

use mentora_store::StoreError;

/// Errors that can occur during session management.
///
/// These cover the lifecycle of a device session: resolving the device,
/// reading and writing the session record, and validation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    /// The device id could not be resolved or persisted.
    ///
    /// Fatal to session initialization: without a device id there is no
    /// session key, so the user has to sign in again.
    #[error("device identity unavailable: {0}")]
    IdentityUnavailable(String),

    /// The identity provider reports nobody signed in.
    #[error("no authenticated user")]
    NotAuthenticated,

    /// The session record is missing, inactive, or idle-expired.
    #[error("session {0} is no longer valid")]
    SessionInvalid(String),

    /// A remote store call failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}
