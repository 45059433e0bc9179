//! Token codec: encoding, signing, decoding, and expiry checks.
//!
//! Tokens use the familiar three-segment JWT layout:
//!
//! ```text
//! base64url(header) . base64url(claims) . base64url(HMAC-SHA256(header.claims))
//! ```
//!
//! [`TokenCodec::decode`] is deliberately signature-agnostic: it is a claims
//! inspector, used for expiry checks on tokens this device minted itself.
//! Anything that *trusts* a token (the refresh path) calls
//! [`TokenCodec::verify`] first.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{DeviceId, ProtocolError, Role, UserId};

type HmacSha256 = Hmac<Sha256>;

/// TTL used when a duration string can't be parsed: 30 minutes.
pub const DEFAULT_TTL: Duration = Duration::from_secs(1800);

// ---------------------------------------------------------------------------
// Claims
// ---------------------------------------------------------------------------

/// Distinguishes refresh tokens from access tokens in the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// The claims bundle carried by every token.
///
/// `iat` and `exp` are Unix seconds, stamped by [`TokenCodec::encode`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub uid: UserId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,

    pub device_id: DeviceId,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<TokenType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

impl Claims {
    /// Claims for an access token: identity, role, and device binding.
    pub fn access(
        uid: UserId,
        email: Option<String>,
        role: Option<Role>,
        device_id: DeviceId,
    ) -> Self {
        Self {
            uid,
            email,
            role,
            device_id,
            token_type: Some(TokenType::Access),
            iat: None,
            exp: None,
        }
    }

    /// Claims for a refresh token: identity and device binding only.
    pub fn refresh(uid: UserId, device_id: DeviceId) -> Self {
        Self {
            uid,
            email: None,
            role: None,
            device_id,
            token_type: Some(TokenType::Refresh),
            iat: None,
            exp: None,
        }
    }

    /// `true` if `exp` is missing or `now >= exp`.
    pub fn is_expired_at(&self, now_secs: i64) -> bool {
        self.exp.is_none_or(|exp| now_secs >= exp)
    }
}

/// An access token and the refresh token minted alongside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct Header {
    alg: &'static str,
    typ: &'static str,
}

const HEADER: Header = Header {
    alg: "HS256",
    typ: "JWT",
};

// ---------------------------------------------------------------------------
// TokenCodec
// ---------------------------------------------------------------------------

/// Encodes and signs tokens with an HMAC-SHA256 key.
///
/// The codec is cheap to clone and holds no state besides the key, so one
/// instance is shared by every component that mints or checks tokens.
#[derive(Clone)]
pub struct TokenCodec {
    key: Vec<u8>,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec").finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// Creates a codec that signs with `secret`.
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            key: secret.as_ref().to_vec(),
        }
    }

    /// Stamps `iat = now` and `exp = now + ttl`, then signs the claims.
    ///
    /// Any `iat`/`exp` already present on `claims` is overwritten.
    pub fn encode(
        &self,
        claims: &Claims,
        ttl: Duration,
    ) -> Result<String, ProtocolError> {
        let now = Utc::now().timestamp();
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let stamped = Claims {
            iat: Some(now),
            exp: Some(now.saturating_add(ttl_secs)),
            ..claims.clone()
        };
        self.sign(&stamped)
    }

    /// Signs `claims` exactly as given, without touching `iat`/`exp`.
    pub fn sign(&self, claims: &Claims) -> Result<String, ProtocolError> {
        let header =
            serde_json::to_vec(&HEADER).map_err(ProtocolError::Encode)?;
        let payload =
            serde_json::to_vec(claims).map_err(ProtocolError::Encode)?;

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header),
            URL_SAFE_NO_PAD.encode(payload)
        );
        let signature = self.mac(signing_input.as_bytes())?;

        Ok(format!(
            "{signing_input}.{}",
            URL_SAFE_NO_PAD.encode(signature)
        ))
    }

    /// Returns `true` if the token's signature was produced with this key.
    ///
    /// The comparison is constant-time (`Mac::verify_slice`).
    pub fn verify(&self, token: &str) -> bool {
        let Some((signing_input, signature)) = token.rsplit_once('.') else {
            return false;
        };
        if signing_input.split('.').count() != 2 {
            return false;
        }
        let Ok(signature) = URL_SAFE_NO_PAD.decode(signature) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.key) else {
            return false;
        };
        mac.update(signing_input.as_bytes());
        mac.verify_slice(&signature).is_ok()
    }

    /// Decodes the claims segment, reporting why a token is malformed.
    pub fn try_decode(token: &str) -> Result<Claims, ProtocolError> {
        let segments: Vec<&str> = token.split('.').collect();
        if segments.len() != 3 {
            return Err(ProtocolError::TokenDecode("expected 3 segments"));
        }
        let payload = URL_SAFE_NO_PAD
            .decode(segments[1])
            .map_err(|_| ProtocolError::TokenDecode("payload is not base64url"))?;
        serde_json::from_slice(&payload)
            .map_err(|_| ProtocolError::TokenDecode("payload is not a claims object"))
    }

    /// Decodes the claims segment; `None` for any malformed input.
    pub fn decode(token: &str) -> Option<Claims> {
        match Self::try_decode(token) {
            Ok(claims) => Some(claims),
            Err(e) => {
                tracing::debug!(error = %e, "token decode failed");
                None
            }
        }
    }

    /// Fail-closed expiry check: undecodable tokens and tokens without
    /// `exp` count as expired.
    pub fn is_expired(token: &str) -> bool {
        Self::decode(token)
            .is_none_or(|claims| claims.is_expired_at(Utc::now().timestamp()))
    }

    fn mac(&self, data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|_| ProtocolError::InvalidKey)?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Parses a duration string of the form `<n><unit>`, unit ∈ {s, m, h, d}.
///
/// Anything else falls back to [`DEFAULT_TTL`] (30 minutes). The fallback
/// is logged at `warn` so a typo in configuration is visible.
pub fn parse_ttl(input: &str) -> Duration {
    let parsed = input
        .char_indices()
        .last()
        .and_then(|(idx, unit)| {
            let digits = &input[..idx];
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let value: u64 = digits.parse().ok()?;
            let scale = match unit {
                's' => 1,
                'm' => 60,
                'h' => 3_600,
                'd' => 86_400,
                _ => return None,
            };
            value.checked_mul(scale)
        });

    match parsed {
        Some(secs) => Duration::from_secs(secs),
        None => {
            tracing::warn!(
                input,
                default_secs = DEFAULT_TTL.as_secs(),
                "unrecognized TTL, using default"
            );
            DEFAULT_TTL
        }
    }
}

/// Non-reversible fingerprint of a token (SHA-256, lowercase hex).
///
/// Stored in the session record for audit; never used for validation.
pub fn fingerprint(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

// =========================================================================
// Tests
// =========================================================================
