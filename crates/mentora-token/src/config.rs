//! Token configuration and state.

use std::time::Duration;

use chrono::{DateTime, Utc};
use mentora_protocol::{TokenPair, parse_ttl};

// ---------------------------------------------------------------------------
// TokenConfig
// ---------------------------------------------------------------------------

/// Configuration for token issuance.
#[derive(Clone)]
pub struct TokenConfig {
    /// Lifetime of access tokens. Default: 30 minutes.
    pub access_ttl: Duration,

    /// Lifetime of refresh tokens. Default: 7 days.
    pub refresh_ttl: Duration,

    /// HMAC key used to sign tokens.
    pub signing_secret: String,
}

const DEV_SECRET: &str = "mentora-dev-signing-secret";

impl TokenConfig {
    /// Reads `MENTORA_ACCESS_TTL`, `MENTORA_REFRESH_TTL` and
    /// `MENTORA_SIGNING_SECRET`, falling back to the defaults for anything
    /// unset. TTLs use the `<n><s|m|h|d>` format.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let ttl = |key: &str, fallback: Duration| {
            std::env::var(key).map(|v| parse_ttl(&v)).unwrap_or(fallback)
        };

        let signing_secret = std::env::var("MENTORA_SIGNING_SECRET").unwrap_or_else(|_| {
            tracing::warn!("MENTORA_SIGNING_SECRET not set, using development secret");
            DEV_SECRET.to_owned()
        });

        Self {
            access_ttl: ttl("MENTORA_ACCESS_TTL", defaults.access_ttl),
            refresh_ttl: ttl("MENTORA_REFRESH_TTL", defaults.refresh_ttl),
            signing_secret,
        }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            access_ttl: Duration::from_secs(30 * 60),
            refresh_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            signing_secret: DEV_SECRET.to_owned(),
        }
    }
}

impl std::fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenConfig")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("signing_secret", &"<redacted>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// TokenState
// ---------------------------------------------------------------------------

/// Where the token manager is in its lifecycle.
///
/// ```text
/// NoTokens ──(issue)──→ Valid ──(access exp)──→ Expired ──→ Refreshing
///    ↑                    ↑                                     │
///    │                    └──────────────(success)──────────────┤
///    └─────────────────────────(failure)────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    NoTokens,
    Valid,
    Expired,
    Refreshing,
}

impl std::fmt::Display for TokenState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoTokens => write!(f, "NoTokens"),
            Self::Valid => write!(f, "Valid"),
            Self::Expired => write!(f, "Expired"),
            Self::Refreshing => write!(f, "Refreshing"),
        }
    }
}

// ---------------------------------------------------------------------------
// PersistedTokens
// ---------------------------------------------------------------------------

/// A token pair read back from local storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedTokens {
    pub pair: TokenPair,

    /// When the pair was persisted. `None` if the timestamp key is missing
    /// or unreadable.
    pub stored_at: Option<DateTime<Utc>>,
}
