//! `SessionClient` builder and the UI-facing session API.
//!
//! This is the entry point the app talks to. It ties the layers together:
//! device identity → session record → tokens → heartbeat, and turns their
//! outcomes into [`SessionEvent`]s for the UI.

use std::sync::Arc;

use mentora_heartbeat::{
    ActivityHeartbeat, HeartbeatConfig, HeartbeatHandle, HeartbeatTarget,
    TargetError,
};
use mentora_protocol::{DeviceId, SessionRecord, UserId};
use mentora_session::{
    DeviceIdentity, DevicePlatform, IdentityProvider, SessionConfig,
    SessionError, SessionManager,
};
use mentora_store::{DocumentStore, LocalStorage};
use mentora_token::{TokenConfig, TokenError, TokenManager};
use tokio::sync::broadcast;

use crate::MentoraError;

/// Notifications surfaced to the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Tokens were issued and the session record is live.
    SignedIn { user_id: UserId },
    /// The user signed out (locally, or through the identity provider).
    SignedOut,
    /// The session was revoked, idled out, or could not be refreshed.
    /// The user has been signed out and must authenticate again.
    Expired,
}

/// Result of validating the session at startup or on foreground.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub valid: bool,
    pub session: Option<SessionRecord>,
}

impl SessionSnapshot {
    fn invalid() -> Self {
        Self {
            valid: false,
            session: None,
        }
    }
}

/// Builder for configuring a [`SessionClient`].
///
/// # Example
///
/// ```rust,ignore
/// let client = SessionClient::builder()
///     .token_config(TokenConfig::from_env())
///     .build(store, identity, platform, storage);
/// let snapshot = client.restore().await?;
/// ```
pub struct SessionClientBuilder {
    session_config: SessionConfig,
    token_config: TokenConfig,
    heartbeat_config: HeartbeatConfig,
    event_capacity: usize,
}

impl SessionClientBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            session_config: SessionConfig::default(),
            token_config: TokenConfig::default(),
            heartbeat_config: HeartbeatConfig::default(),
            event_capacity: 16,
        }
    }

    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    pub fn token_config(mut self, config: TokenConfig) -> Self {
        self.token_config = config;
        self
    }

    pub fn heartbeat_config(mut self, config: HeartbeatConfig) -> Self {
        self.heartbeat_config = config;
        self
    }

    /// How many unread events a slow subscriber may lag behind before it
    /// starts missing them.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Wires the managers together around the given collaborators.
    pub fn build<S, I, P, L>(
        self,
        store: Arc<S>,
        identity: Arc<I>,
        platform: Arc<P>,
        storage: Arc<L>,
    ) -> SessionClient<S, I, P, L>
    where
        S: DocumentStore,
        I: IdentityProvider,
        P: DevicePlatform,
        L: LocalStorage,
    {
        let sessions = Arc::new(SessionManager::new(
            store,
            Arc::clone(&identity),
            Arc::clone(&platform),
            self.session_config,
        ));
        let tokens = TokenManager::new(
            Arc::clone(&sessions),
            Arc::clone(&storage),
            self.token_config,
        );
        let (events, _) = broadcast::channel(self.event_capacity);

        SessionClient {
            inner: Arc::new(ClientInner {
                identity,
                device: DeviceIdentity::new(storage, platform),
                sessions,
                tokens,
                events,
                heartbeat_config: self.heartbeat_config,
            }),
        }
    }
}

impl Default for SessionClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct ClientInner<S, I, P, L> {
    identity: Arc<I>,
    device: DeviceIdentity<L, P>,
    sessions: Arc<SessionManager<S, I, P>>,
    tokens: TokenManager<S, I, P, L>,
    events: broadcast::Sender<SessionEvent>,
    heartbeat_config: HeartbeatConfig,
}

/// The session core as seen by the app.
///
/// Cheap to clone; clones share all state.
pub struct SessionClient<S, I, P, L> {
    inner: Arc<ClientInner<S, I, P, L>>,
}

impl<S, I, P, L> Clone for SessionClient<S, I, P, L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl SessionClient<(), (), (), ()> {
    /// Creates a new builder.
    pub fn builder() -> SessionClientBuilder {
        SessionClientBuilder::new()
    }
}

impl<S, I, P, L> SessionClient<S, I, P, L>
where
    S: DocumentStore,
    I: IdentityProvider,
    P: DevicePlatform,
    L: LocalStorage,
{
    pub fn sessions(&self) -> &Arc<SessionManager<S, I, P>> {
        &self.inner.sessions
    }

    pub fn tokens(&self) -> &TokenManager<S, I, P, L> {
        &self.inner.tokens
    }

    /// Subscribes to [`SessionEvent`]s.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// The last known snapshot of this device's session.
    pub fn current_session(&self) -> Option<SessionRecord> {
        self.inner.sessions.current_session()
    }

    fn emit(&self, event: SessionEvent) {
        tracing::debug!(?event, "session event");
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    fn current_uid(&self) -> Result<UserId, SessionError> {
        self.inner
            .identity
            .current_user()
            .map(|user| user.uid)
            .ok_or(SessionError::NotAuthenticated)
    }

    async fn ensure_device_id(&self) -> Result<DeviceId, SessionError> {
        if let Some(device_id) = self.inner.sessions.device_id() {
            return Ok(device_id);
        }
        let device_id = self.inner.device.get_or_create_device_id().await?;
        self.inner.sessions.set_device_id(device_id.clone());
        Ok(device_id)
    }

    // =====================================================================
    // Startup and sign-in
    // =====================================================================

    /// Resolves the device and validates the signed-in user's session.
    ///
    /// An invalid session signs the user out and emits
    /// [`SessionEvent::Expired`]. With nobody signed in the snapshot is
    /// simply invalid.
    ///
    /// # Errors
    /// [`SessionError::IdentityUnavailable`] if the device id can't be
    /// resolved; the app has to treat that as a failed start.
    pub async fn initialize_session(&self) -> Result<SessionSnapshot, MentoraError> {
        self.ensure_device_id().await?;
        if self.inner.identity.current_user().is_none() {
            return Ok(SessionSnapshot::invalid());
        }
        self.refresh_session().await
    }

    /// Re-validates the session, as on every foreground transition.
    ///
    /// Valid: the snapshot is refreshed and activity touched. Invalid: a
    /// full local sign-out followed by [`SessionEvent::Expired`].
    pub async fn refresh_session(&self) -> Result<SessionSnapshot, MentoraError> {
        if self.inner.sessions.validate().await {
            if let Err(e) = self.inner.sessions.touch_activity().await {
                tracing::warn!(error = %e, "failed to touch session after validation");
            }
            Ok(SessionSnapshot {
                valid: true,
                session: self.inner.sessions.current_session(),
            })
        } else {
            self.expire().await;
            Ok(SessionSnapshot::invalid())
        }
    }

    /// Establishes the session after the identity provider signed a user
    /// in: upserts the session record, then issues and persists tokens.
    ///
    /// The user's role is read from their profile; a missing profile
    /// (e.g. mid-registration) issues tokens without a role.
    pub async fn on_signed_in(&self) -> Result<SessionRecord, MentoraError> {
        let user = self
            .inner
            .identity
            .current_user()
            .ok_or(SessionError::NotAuthenticated)?;
        self.ensure_device_id().await?;

        let record = self.inner.sessions.create_or_update().await?;

        let role = match self.inner.sessions.user_role(&user.uid).await {
            Ok(role) => role,
            Err(e) => {
                tracing::warn!(uid = %user.uid, error = %e, "no role available at sign-in");
                None
            }
        };
        let pair = self.inner.tokens.issue_tokens(&user, role.as_ref())?;
        self.inner.tokens.persist(&pair).await?;

        tracing::info!(uid = %user.uid, "signed in");
        self.emit(SessionEvent::SignedIn { user_id: user.uid });
        Ok(record)
    }

    /// Startup path for an app that may already be signed in.
    ///
    /// Validates the session, loads persisted tokens (issuing a fresh pair
    /// if none survived), and makes sure a valid access token can be
    /// produced. Any failure along the way leaves the user signed out.
    pub async fn restore(&self) -> Result<SessionSnapshot, MentoraError> {
        let snapshot = self.initialize_session().await?;
        if !snapshot.valid {
            return Ok(snapshot);
        }

        if self.inner.tokens.load_persisted().await?.is_none() {
            tracing::info!("no persisted tokens, issuing a new pair");
            let user = self
                .inner
                .identity
                .current_user()
                .ok_or(SessionError::NotAuthenticated)?;
            let role = self.inner.sessions.user_role(&user.uid).await.ok().flatten();
            let pair = self.inner.tokens.issue_tokens(&user, role.as_ref())?;
            self.inner.tokens.persist(&pair).await?;
        }

        match self.get_valid_access_token().await {
            Ok(_) => Ok(snapshot),
            Err(e) if e.requires_reauth() => Ok(SessionSnapshot::invalid()),
            Err(e) => Err(e),
        }
    }

    // =====================================================================
    // Tokens
    // =====================================================================

    /// Returns a valid access token. Every authenticated call goes
    /// through here.
    ///
    /// A failed refresh signs the user out and emits
    /// [`SessionEvent::Expired`] before the error is returned.
    pub async fn get_valid_access_token(&self) -> Result<String, MentoraError> {
        match self.inner.tokens.get_valid_access_token().await {
            Ok(token) => Ok(token),
            Err(e @ TokenError::RefreshFailure(_)) => {
                if self.inner.identity.current_user().is_some() {
                    self.expire().await;
                }
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    // =====================================================================
    // Session listing and revocation
    // =====================================================================

    /// All of the current user's sessions, most recent first.
    pub async fn get_user_sessions(&self) -> Result<Vec<SessionRecord>, MentoraError> {
        let uid = self.current_uid()?;
        Ok(self.inner.sessions.list_sessions(&uid).await?)
    }

    /// The current user's active sessions, most recent first.
    pub async fn get_active_sessions(&self) -> Result<Vec<SessionRecord>, MentoraError> {
        let uid = self.current_uid()?;
        Ok(self.inner.sessions.list_active_sessions(&uid).await?)
    }

    /// Revokes the session on `device_id`. Revoking this device is the
    /// same as [`sign_out`](Self::sign_out).
    pub async fn logout_device(&self, device_id: &DeviceId) -> Result<(), MentoraError> {
        if self.inner.sessions.device_id().as_ref() == Some(device_id) {
            return self.sign_out().await;
        }
        Ok(self.inner.sessions.logout_device(device_id).await?)
    }

    /// Revokes every session of the current user, this device included,
    /// then signs out locally. Returns how many sessions were revoked.
    pub async fn logout_all_devices(&self) -> Result<usize, MentoraError> {
        let uid = self.current_uid()?;
        let count = self.inner.sessions.logout_all_devices(&uid).await?;
        self.sign_out().await?;
        Ok(count)
    }

    /// Signs out: clears tokens, deactivates this device's session, drops
    /// the snapshot, and signs out of the identity provider.
    ///
    /// Every step runs even if an earlier one fails; the first error is
    /// returned.
    pub async fn sign_out(&self) -> Result<(), MentoraError> {
        let result = self.sign_out_locally().await;
        tracing::info!("signed out");
        self.emit(SessionEvent::SignedOut);
        result
    }

    async fn sign_out_locally(&self) -> Result<(), MentoraError> {
        let cleared = self.inner.tokens.clear_tokens().await;
        self.inner.sessions.clear_current();
        let provider = self.inner.identity.sign_out().await;

        cleared?;
        provider?;
        Ok(())
    }

    /// Forced sign-out after validation or refresh failed.
    async fn expire(&self) {
        if let Err(e) = self.sign_out_locally().await {
            tracing::warn!(error = %e, "sign-out after session expiry was incomplete");
        }
        tracing::info!("session expired");
        self.emit(SessionEvent::Expired);
    }

    /// Clears local state after the identity provider signed the user out
    /// on its own. Emits [`SessionEvent::SignedOut`] only if there was
    /// something to clear.
    pub(crate) async fn on_signed_out(&self) {
        let had_state = self.inner.tokens.cached().is_some()
            || self.inner.sessions.current_session().is_some();

        if let Err(e) = self.inner.tokens.clear_tokens().await {
            tracing::warn!(error = %e, "failed to clear tokens after provider sign-out");
        }
        self.inner.sessions.clear_current();

        if had_state {
            self.emit(SessionEvent::SignedOut);
        }
    }

    pub(crate) fn identity(&self) -> &Arc<I> {
        &self.inner.identity
    }

    // =====================================================================
    // Heartbeat
    // =====================================================================

    /// Starts the activity heartbeat for this client.
    ///
    /// Report app lifecycle changes through the returned handle.
    pub fn start_heartbeat(&self) -> HeartbeatHandle {
        ActivityHeartbeat::spawn(
            Arc::new(self.clone()),
            self.inner.heartbeat_config.clone(),
        )
    }
}

impl<S, I, P, L> HeartbeatTarget for SessionClient<S, I, P, L>
where
    S: DocumentStore,
    I: IdentityProvider,
    P: DevicePlatform,
    L: LocalStorage,
{
    async fn touch_activity(&self) -> Result<(), TargetError> {
        Ok(self.inner.sessions.touch_activity().await?)
    }

    async fn refresh_tokens(&self) -> Result<(), TargetError> {
        if self.inner.identity.current_user().is_none() {
            return Ok(());
        }
        // Background ticks never sign the user out; the next foreground
        // validation or interactive call decides that.
        self.inner.tokens.get_valid_access_token().await?;
        Ok(self.inner.sessions.touch_activity().await?)
    }

    async fn on_foreground(&self) -> Result<(), TargetError> {
        if self.inner.identity.current_user().is_none() {
            return Ok(());
        }
        self.refresh_session().await?;
        Ok(())
    }

    async fn on_background(&self) -> Result<(), TargetError> {
        Ok(self.inner.sessions.touch_activity().await?)
    }
}
