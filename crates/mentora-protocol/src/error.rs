//! Error types for the protocol layer.
//!
//! Each crate in Mentora defines its own error enum. A `ProtocolError`
//! always means the problem is in token encoding or decoding, not in
//! storage or session state.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serializing claims or the token header to JSON failed.
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// The token string is malformed: wrong segment count, invalid
    /// base64url, or a payload that is not a claims object.
    ///
    /// Callers treat this exactly like an expired token (fail-closed).
    #[error("malformed token: {0}")]
    TokenDecode(&'static str),

    /// The signing key was rejected by the MAC implementation.
    #[error("invalid signing key")]
    InvalidKey,
}
