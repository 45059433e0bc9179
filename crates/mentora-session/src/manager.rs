//! The session manager: owns this device's session record.
//!
//! Every signed-in (user, device) pair has exactly one document in the
//! sessions collection, keyed by [`session_key`]. This manager is
//! responsible for:
//! - Creating or refreshing that document on sign-in
//! - Touching `lastActivity` (heartbeat, refresh, foreground)
//! - Validating liveness, and deactivating idle-expired records
//! - Listing a user's sessions, and revoking one or all of them
//!
//! # Concurrency note
//!
//! The remote record has several independent writers (heartbeat, refresh,
//! foreground validation, logout on this or another device). None of them
//! hold a lock across store calls; each write is a single-document update
//! and later writes win. The one multi-document write, logout-all, goes
//! through an atomic [`WriteBatch`].

use std::sync::Arc;

use chrono::Utc;
use mentora_protocol::{
    AuthUser, DeviceId, Role, SessionRecord, UserId, session_key,
};
use mentora_store::{
    Direction, Document, DocumentStore, FieldUpdates, Query, SetMode,
    StoreError, WriteBatch,
};
use parking_lot::RwLock;

use crate::{
    DevicePlatform, IdentityProvider, SessionConfig, SessionError,
    SessionStatus,
};

/// Manages the session record for this device.
///
/// ## Lifecycle
///
/// ```text
/// create_or_update() ──→ touch_activity() ──→ validate()
///         │                                      │
///         │                          idle > timeout ──→ deactivate
///         ▼                                      ▼
///      [Live] ──(logout_device / logout_all)──→ [Inactive]
/// ```
pub struct SessionManager<S, I, P> {
    store: Arc<S>,
    identity: Arc<I>,
    platform: Arc<P>,
    config: SessionConfig,

    /// Resolved once at startup; `None` until then, which turns
    /// activity touches into no-ops.
    device_id: RwLock<Option<DeviceId>>,

    /// Last record this manager read or wrote for its own device.
    current: RwLock<Option<SessionRecord>>,
}

impl<S, I, P> SessionManager<S, I, P>
where
    S: DocumentStore,
    I: IdentityProvider,
    P: DevicePlatform,
{
    pub fn new(
        store: Arc<S>,
        identity: Arc<I>,
        platform: Arc<P>,
        config: SessionConfig,
    ) -> Self {
        Self {
            store,
            identity,
            platform,
            config,
            device_id: RwLock::new(None),
            current: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn identity(&self) -> &Arc<I> {
        &self.identity
    }

    pub fn set_device_id(&self, device_id: DeviceId) {
        *self.device_id.write() = Some(device_id);
    }

    pub fn device_id(&self) -> Option<DeviceId> {
        self.device_id.read().clone()
    }

    /// The in-memory snapshot of this device's session, if any.
    pub fn current_session(&self) -> Option<SessionRecord> {
        self.current.read().clone()
    }

    /// Drops the in-memory snapshot without touching the store.
    pub fn clear_current(&self) {
        *self.current.write() = None;
    }

    /// The signed-in user and this device, if both are known.
    fn signed_in(&self) -> Option<(AuthUser, DeviceId)> {
        let user = self.identity.current_user()?;
        let device_id = self.device_id()?;
        Some((user, device_id))
    }

    fn sessions(&self) -> &str {
        &self.config.sessions_collection
    }

    async fn fetch(&self, key: &str) -> Result<Option<SessionRecord>, SessionError> {
        let doc = self.store.get(self.sessions(), key).await?;
        Ok(doc.as_ref().map(decode_record).transpose()?)
    }

    fn device_info_value(
        &self,
        device_id: &DeviceId,
    ) -> Result<serde_json::Value, SessionError> {
        serde_json::to_value(self.platform.device_info(device_id))
            .map_err(|e| StoreError::InvalidData(e.to_string()).into())
    }

    // =====================================================================
    // Create / touch
    // =====================================================================

    /// Creates this device's session record, or reactivates and refreshes
    /// the existing one.
    ///
    /// `createdAt` is written only on creation. Device info is overwritten
    /// every time so it tracks app and OS upgrades.
    ///
    /// # Errors
    /// [`SessionError::NotAuthenticated`] with nobody signed in,
    /// [`SessionError::IdentityUnavailable`] before the device id is
    /// resolved, or a store error.
    pub async fn create_or_update(&self) -> Result<SessionRecord, SessionError> {
        let user = self
            .identity
            .current_user()
            .ok_or(SessionError::NotAuthenticated)?;
        let device_id = self.device_id().ok_or_else(|| {
            SessionError::IdentityUnavailable("device id not resolved".into())
        })?;
        let key = session_key(&user.uid, &device_id);
        let device_info = self.device_info_value(&device_id)?;

        if self.store.get(self.sessions(), &key).await?.is_some() {
            self.store
                .update(
                    self.sessions(),
                    &key,
                    FieldUpdates::new()
                        .set("deviceInfo", device_info)
                        .set("isActive", true)
                        .server_timestamp("lastActivity"),
                )
                .await?;
            tracing::info!(uid = %user.uid, %device_id, "session refreshed");
        } else {
            self.store
                .set(
                    self.sessions(),
                    &key,
                    FieldUpdates::new()
                        .set("userId", user.uid.as_str())
                        .set("deviceInfo", device_info)
                        .set("isActive", true)
                        .server_timestamp("createdAt")
                        .server_timestamp("lastActivity"),
                    SetMode::Overwrite,
                )
                .await?;
            tracing::info!(uid = %user.uid, %device_id, "session created");
        }

        let record = self.fetch(&key).await?.ok_or_else(|| StoreError::NotFound {
            collection: self.sessions().to_owned(),
            id: key.clone(),
        })?;
        *self.current.write() = Some(record.clone());
        Ok(record)
    }

    /// Bumps `lastActivity` on this device's record.
    ///
    /// A no-op when nobody is signed in or the device id isn't resolved.
    pub async fn touch_activity(&self) -> Result<(), SessionError> {
        let Some((user, device_id)) = self.signed_in() else {
            return Ok(());
        };
        let key = session_key(&user.uid, &device_id);
        self.store
            .update(
                self.sessions(),
                &key,
                FieldUpdates::new().server_timestamp("lastActivity"),
            )
            .await?;
        tracing::trace!(%key, "session activity touched");
        Ok(())
    }

    // =====================================================================
    // Validation
    // =====================================================================

    async fn evaluate(
        &self,
        key: &str,
    ) -> Result<(SessionStatus, Option<SessionRecord>), SessionError> {
        let Some(record) = self.fetch(key).await? else {
            return Ok((SessionStatus::Missing, None));
        };
        let status = if !record.is_active {
            SessionStatus::Inactive
        } else if record.is_idle_expired(Utc::now(), self.config.idle_timeout()) {
            SessionStatus::IdleExpired
        } else {
            SessionStatus::Live
        };
        Ok((status, Some(record)))
    }

    /// Reads this device's session status without side effects.
    pub async fn status(&self) -> Result<SessionStatus, SessionError> {
        let Some((user, device_id)) = self.signed_in() else {
            return Ok(SessionStatus::Unauthenticated);
        };
        let (status, _) = self.evaluate(&session_key(&user.uid, &device_id)).await?;
        Ok(status)
    }

    /// Returns `true` if this device's session is live.
    pub async fn is_live(&self) -> Result<bool, SessionError> {
        Ok(self.status().await?.is_live())
    }

    /// Returns this device's record if it is live, without side effects.
    ///
    /// # Errors
    /// [`SessionError::NotAuthenticated`] without a user or device id,
    /// [`SessionError::SessionInvalid`] if the record is missing, inactive
    /// or idle-expired.
    pub async fn require_live(&self) -> Result<SessionRecord, SessionError> {
        let (user, device_id) = self.signed_in().ok_or(SessionError::NotAuthenticated)?;
        let key = session_key(&user.uid, &device_id);
        match self.evaluate(&key).await? {
            (SessionStatus::Live, Some(record)) => Ok(record),
            (status, _) => {
                tracing::debug!(%key, ?status, "session not live");
                Err(SessionError::SessionInvalid(key))
            }
        }
    }

    /// Validates this device's session, surfacing store errors.
    ///
    /// An idle-expired record is deactivated as a side effect. A live
    /// record replaces the in-memory snapshot.
    pub async fn try_validate(&self) -> Result<bool, SessionError> {
        let Some((user, device_id)) = self.signed_in() else {
            return Ok(false);
        };
        let key = session_key(&user.uid, &device_id);

        match self.evaluate(&key).await? {
            (SessionStatus::Live, Some(record)) => {
                *self.current.write() = Some(record);
                Ok(true)
            }
            (SessionStatus::IdleExpired, _) => {
                tracing::info!(%key, "session idle-expired, deactivating");
                self.mark_inactive(&key).await?;
                Ok(false)
            }
            (status, _) => {
                tracing::debug!(%key, ?status, "session not valid");
                Ok(false)
            }
        }
    }

    /// Validates this device's session.
    ///
    /// Fails closed: a store error reads as an invalid session.
    pub async fn validate(&self) -> bool {
        match self.try_validate().await {
            Ok(valid) => valid,
            Err(e) => {
                tracing::warn!(error = %e, "session validation failed");
                false
            }
        }
    }

    // =====================================================================
    // Deactivation
    // =====================================================================

    async fn mark_inactive(&self, key: &str) -> Result<(), SessionError> {
        self.store
            .update(
                self.sessions(),
                key,
                FieldUpdates::new()
                    .set("isActive", false)
                    .server_timestamp("deactivatedAt"),
            )
            .await?;

        let mut current = self.current.write();
        if current.as_ref().is_some_and(|r| r.id == key) {
            *current = None;
        }
        Ok(())
    }

    /// Deactivates this device's session.
    ///
    /// Idempotent: a missing or already-inactive record is left untouched,
    /// so `deactivatedAt` keeps its first value.
    pub async fn deactivate(&self) -> Result<(), SessionError> {
        let Some((user, device_id)) = self.signed_in() else {
            self.clear_current();
            return Ok(());
        };
        let key = session_key(&user.uid, &device_id);

        match self.fetch(&key).await? {
            Some(record) if record.is_active => {
                self.mark_inactive(&key).await?;
                tracing::info!(uid = %user.uid, %device_id, "session deactivated");
            }
            _ => self.clear_current(),
        }
        Ok(())
    }

    /// Deactivates the current user's session on `target`, which may be
    /// another device.
    ///
    /// A no-op when nobody is signed in.
    ///
    /// # Errors
    /// [`StoreError::NotFound`] (wrapped) if the target has no record.
    pub async fn logout_device(&self, target: &DeviceId) -> Result<(), SessionError> {
        let Some(user) = self.identity.current_user() else {
            tracing::debug!(%target, "logout_device without a signed-in user");
            return Ok(());
        };
        let key = session_key(&user.uid, target);

        match self.fetch(&key).await? {
            Some(record) if record.is_active => {
                self.mark_inactive(&key).await?;
                tracing::info!(uid = %user.uid, device_id = %target, "device logged out");
            }
            Some(_) => tracing::debug!(%key, "device already logged out"),
            None => {
                return Err(StoreError::NotFound {
                    collection: self.sessions().to_owned(),
                    id: key,
                }
                .into());
            }
        }
        Ok(())
    }

    /// Deactivates every active session of `user_id` in one atomic batch.
    ///
    /// Returns how many records were deactivated. Signing out of the
    /// identity provider is left to the caller.
    pub async fn logout_all_devices(&self, user_id: &UserId) -> Result<usize, SessionError> {
        let active = self.list_active_sessions(user_id).await?;
        if active.is_empty() {
            return Ok(0);
        }

        let mut batch = WriteBatch::new();
        for record in &active {
            batch.update(
                self.sessions(),
                &record.id,
                FieldUpdates::new()
                    .set("isActive", false)
                    .server_timestamp("deactivatedAt"),
            );
        }
        self.store.commit(batch).await?;

        let mut current = self.current.write();
        if current
            .as_ref()
            .is_some_and(|c| active.iter().any(|r| r.id == c.id))
        {
            *current = None;
        }

        tracing::info!(uid = %user_id, count = active.len(), "all devices logged out");
        Ok(active.len())
    }

    // =====================================================================
    // Listing
    // =====================================================================

    /// All of `user_id`'s sessions, most recently active first.
    pub async fn list_sessions(&self, user_id: &UserId) -> Result<Vec<SessionRecord>, SessionError> {
        let query = Query::new()
            .where_eq("userId", user_id.as_str())
            .order_by("lastActivity", Direction::Descending);
        self.run_query(&query).await
    }

    /// `user_id`'s active sessions, most recently active first.
    pub async fn list_active_sessions(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<SessionRecord>, SessionError> {
        let query = Query::new()
            .where_eq("userId", user_id.as_str())
            .where_eq("isActive", true)
            .order_by("lastActivity", Direction::Descending);
        self.run_query(&query).await
    }

    async fn run_query(&self, query: &Query) -> Result<Vec<SessionRecord>, SessionError> {
        let docs = self.store.query(self.sessions(), query).await?;
        Ok(docs
            .iter()
            .map(decode_record)
            .collect::<Result<Vec<_>, _>>()?)
    }

    // =====================================================================
    // Token support
    // =====================================================================

    /// Stores token fingerprints on the session for `(user_id, device_id)`.
    ///
    /// An existing record only gets its hashes updated; its `isActive`
    /// flag is left alone so a concurrent revocation sticks. A missing
    /// record is created live.
    pub async fn record_token_fingerprints(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
        access_hash: &str,
        refresh_hash: &str,
    ) -> Result<(), SessionError> {
        let key = session_key(user_id, device_id);
        let hashes = FieldUpdates::new()
            .set("accessTokenHash", access_hash)
            .set("refreshTokenHash", refresh_hash);

        if self.store.get(self.sessions(), &key).await?.is_some() {
            self.store.update(self.sessions(), &key, hashes).await?;
        } else {
            let fields = hashes
                .set("userId", user_id.as_str())
                .set("deviceInfo", self.device_info_value(device_id)?)
                .set("isActive", true)
                .server_timestamp("createdAt")
                .server_timestamp("lastActivity");
            self.store
                .set(self.sessions(), &key, fields, SetMode::Overwrite)
                .await?;
        }
        tracing::debug!(%key, "token fingerprints recorded");
        Ok(())
    }

    /// Reads the user's current role from their profile document.
    ///
    /// `Ok(None)` means the profile exists but has no role.
    ///
    /// # Errors
    /// [`StoreError::NotFound`] (wrapped) if the profile doesn't exist.
    pub async fn user_role(&self, user_id: &UserId) -> Result<Option<Role>, SessionError> {
        let users = &self.config.users_collection;
        let doc = self
            .store
            .get(users, user_id.as_str())
            .await?
            .ok_or_else(|| StoreError::NotFound {
                collection: users.clone(),
                id: user_id.to_string(),
            })?;
        Ok(doc
            .field("role")
            .and_then(|v| v.as_str())
            .map(Role::new))
    }
}

fn decode_record(doc: &Document) -> Result<SessionRecord, StoreError> {
    let mut record: SessionRecord = doc.decode()?;
    record.id = doc.id.clone();
    Ok(record)
}

// =========================================================================
// Tests
// =========================================================================
