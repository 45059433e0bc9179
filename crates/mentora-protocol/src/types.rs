//! Core data types for the session subsystem.
//!
//! Everything here is a plain value that can be serialized into a remote
//! document or a token payload. Field names are camelCase on the wire to
//! match the documents the rest of the mobile app already reads.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Account identifier issued by the identity provider.
///
/// A newtype over `String` so it can't be swapped with a [`DeviceId`] by
/// accident. `#[serde(transparent)]` keeps it a bare string on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable per-install device identifier.
///
/// Generated once, persisted locally, and never changed for the lifetime
/// of the install. A reinstall produces a new one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A user's role on the platform (e.g. `"mentor"`, `"mentee"`).
///
/// Kept as an open string: the role lives in the user document, which is
/// owned by the wider app, and may gain values this crate doesn't know.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(pub String);

impl Role {
    pub fn new(role: impl Into<String>) -> Self {
        Self(role.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The signed-in account as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub uid: UserId,
    pub email: Option<String>,
}

impl AuthUser {
    pub fn new(uid: impl Into<String>, email: Option<&str>) -> Self {
        Self {
            uid: UserId::new(uid),
            email: email.map(str::to_owned),
        }
    }
}

/// Document id of the session record for a (user, device) pair.
///
/// The key is what enforces "at most one record per user-device pair":
/// writing the same pair twice always hits the same document.
pub fn session_key(user_id: &UserId, device_id: &DeviceId) -> String {
    format!("{user_id}_{device_id}")
}

// ---------------------------------------------------------------------------
// DeviceInfo
// ---------------------------------------------------------------------------

/// Snapshot of the device a session runs on. Overwritten on every
/// session refresh, so it always reflects the latest app/OS version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub device_id: DeviceId,
    pub platform: String,
    pub os_version: String,
    pub app_version: String,
    pub brand: String,
    pub model: String,
}

// ---------------------------------------------------------------------------
// SessionRecord
// ---------------------------------------------------------------------------

/// One authenticated device's relationship with a user account.
///
/// Stored in the `userSessions` collection under [`session_key`].
/// Timestamps are written by the store (server timestamps) and persisted
/// as epoch milliseconds so they order numerically in queries.
///
/// Lifecycle:
///
/// ```text
///   created (first sign-in) ──(heartbeat / refresh / validate)──→ touched
///        │                                                          │
///        └────────(logout, logout-all, idle > 30 days)──→ isActive = false
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Document id. Not part of the stored fields; filled in on read.
    #[serde(skip)]
    pub id: String,

    pub user_id: UserId,

    pub device_info: DeviceInfo,

    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_activity: Option<DateTime<Utc>>,

    pub is_active: bool,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub deactivated_at: Option<DateTime<Utc>>,

    /// SHA-256 fingerprint of the last issued access token. Audit only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token_hash: Option<String>,

    /// SHA-256 fingerprint of the last issued refresh token. Audit only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token_hash: Option<String>,
}

impl SessionRecord {
    /// How long the session has gone without an activity touch.
    ///
    /// `None` when the record has never been touched.
    pub fn idle_for(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.last_activity.map(|last| now - last)
    }

    /// Returns `true` if the idle period exceeds `idle_timeout`.
    ///
    /// A record without `lastActivity` is not considered idle-expired.
    pub fn is_idle_expired(
        &self,
        now: DateTime<Utc>,
        idle_timeout: Duration,
    ) -> bool {
        self.idle_for(now).is_some_and(|idle| idle > idle_timeout)
    }

    /// A session is live iff it is active and not idle-expired.
    pub fn is_live(&self, now: DateTime<Utc>, idle_timeout: Duration) -> bool {
        self.is_active && !self.is_idle_expired(now, idle_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(last_activity_days_ago: Option<i64>, is_active: bool) -> SessionRecord {
        let now = Utc::now();
        SessionRecord {
            id: "u1_d1".into(),
            user_id: UserId::new("u1"),
            device_info: DeviceInfo {
                device_id: DeviceId::new("d1"),
                platform: "android".into(),
                os_version: "14".into(),
                app_version: "1.0.0".into(),
                brand: "Pixel".into(),
                model: "8".into(),
            },
            created_at: Some(now),
            last_activity: last_activity_days_ago.map(|d| now - Duration::days(d)),
            is_active,
            deactivated_at: None,
            access_token_hash: None,
            refresh_token_hash: None,
        }
    }

    #[test]
    fn test_session_key_joins_user_and_device() {
        let key = session_key(&UserId::new("uid"), &DeviceId::new("d1"));
        assert_eq!(key, "uid_d1");
    }

    #[test]
    fn test_is_live_active_recent_returns_true() {
        let r = record(Some(1), true);
        assert!(r.is_live(Utc::now(), Duration::days(30)));
    }

    #[test]
    fn test_is_live_inactive_returns_false() {
        let r = record(Some(1), false);
        assert!(!r.is_live(Utc::now(), Duration::days(30)));
    }

    #[test]
    fn test_is_live_idle_31_days_returns_false() {
        let r = record(Some(31), true);
        assert!(r.is_idle_expired(Utc::now(), Duration::days(30)));
        assert!(!r.is_live(Utc::now(), Duration::days(30)));
    }

    #[test]
    fn test_is_live_never_touched_is_not_idle_expired() {
        let r = record(None, true);
        assert!(r.is_live(Utc::now(), Duration::days(30)));
    }

    #[test]
    fn test_serialize_uses_camel_case_and_millis() {
        let r = record(Some(0), true);
        let value = serde_json::to_value(&r).unwrap();

        assert!(value.get("userId").is_some());
        assert!(value.get("isActive").is_some());
        assert!(value["lastActivity"].is_i64());
        assert_eq!(value["deviceInfo"]["deviceId"], "d1");
        // The document id is never written into the document body.
        assert!(value.get("id").is_none());
        // Absent audit hashes are omitted, not written as null.
        assert!(value.get("accessTokenHash").is_none());
    }
}
