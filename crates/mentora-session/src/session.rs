//! Session configuration and validation outcomes.

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Configuration for session behavior.
///
/// Defaults match the hosted backend: a 30-day idle window and the
/// `userSessions` / `users` collections.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long (in seconds) a session may go without an activity touch
    /// before it is treated as expired.
    ///
    /// Default: 30 days.
    pub idle_timeout_secs: u64,

    /// Collection holding one document per (user, device) pair.
    pub sessions_collection: String,

    /// Collection holding user profiles (read for the `role` field).
    pub users_collection: String,
}

impl SessionConfig {
    /// The idle window as a `chrono` duration, for comparing against
    /// stored timestamps.
    pub fn idle_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(
            i64::try_from(self.idle_timeout_secs).unwrap_or(i64::MAX / 1000),
        )
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 30 * 24 * 60 * 60,
            sessions_collection: "userSessions".into(),
            users_collection: "users".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionStatus
// ---------------------------------------------------------------------------

/// Why a session is or isn't usable, as seen by the last read.
///
/// ```text
///   Live ──(logout / logout-all)──→ Inactive
///     │
///     └──(no touch for idle_timeout)──→ IdleExpired ──(validate)──→ Inactive
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Active and touched within the idle window.
    Live,

    /// No record exists for this user-device pair.
    Missing,

    /// The record was deactivated (locally or from another device).
    Inactive,

    /// Still flagged active, but idle for longer than the window.
    IdleExpired,

    /// No signed-in user or no resolved device id.
    Unauthenticated,
}

impl SessionStatus {
    pub fn is_live(self) -> bool {
        matches!(self, Self::Live)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_idle_timeout_is_thirty_days() {
        let config = SessionConfig::default();
        assert_eq!(config.idle_timeout(), chrono::Duration::days(30));
        assert_eq!(config.sessions_collection, "userSessions");
    }

    #[test]
    fn test_status_only_live_is_live() {
        assert!(SessionStatus::Live.is_live());
        for status in [
            SessionStatus::Missing,
            SessionStatus::Inactive,
            SessionStatus::IdleExpired,
            SessionStatus::Unauthenticated,
        ] {
            assert!(!status.is_live(), "{status:?}");
        }
    }
}
