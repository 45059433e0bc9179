//! The token manager: issue, persist, and refresh tokens.
//!
//! Tokens live in two places: an in-memory cache for the hot path, and
//! local storage so a restart doesn't force a new sign-in. The remote
//! store only ever sees fingerprints, written onto the session record.
//!
//! # Failure policy
//!
//! Refresh fails closed. Whatever goes wrong (expired or forged refresh
//! token, revoked session, missing profile, store outage) the local
//! tokens are wiped and the session record is deactivated on a
//! best-effort basis before the error reaches the caller. There are no
//! retries here; the caller decides whether to sign the user out.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use mentora_protocol::{
    AuthUser, Claims, Role, TokenCodec, TokenPair, TokenType, fingerprint,
};
use mentora_session::{
    DevicePlatform, IdentityProvider, SessionError, SessionManager,
};
use mentora_store::{DocumentStore, LocalStorage};
use parking_lot::Mutex;

use crate::{PersistedTokens, TokenConfig, TokenError, TokenState};

/// Local storage key for the access token.
pub const ACCESS_TOKEN_KEY: &str = "access_token";
/// Local storage key for the refresh token.
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
/// Local storage key for the epoch-millis time the pair was stored.
pub const TOKEN_TIMESTAMP_KEY: &str = "token_timestamp";

const TOKEN_KEYS: [&str; 3] = [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, TOKEN_TIMESTAMP_KEY];

type RefreshFuture = Shared<BoxFuture<'static, Result<String, TokenError>>>;

/// The single-flight marker.
///
/// `generation` lets the finishing refresh clear only its own marker,
/// never a newer one installed after it.
enum RefreshState {
    Idle,
    Refreshing {
        generation: u64,
        future: RefreshFuture,
    },
}

struct RefreshSlot {
    state: RefreshState,
    next_generation: u64,
}

impl RefreshSlot {
    fn in_flight(&self) -> Option<RefreshFuture> {
        match &self.state {
            RefreshState::Refreshing { future, .. } => Some(future.clone()),
            RefreshState::Idle => None,
        }
    }
}

/// Issues, caches, persists and refreshes this device's tokens.
///
/// Cheap to clone: all clones share the same cache and the same
/// in-flight refresh.
pub struct TokenManager<S, I, P, L> {
    inner: Arc<Inner<S, I, P, L>>,
}

impl<S, I, P, L> Clone for TokenManager<S, I, P, L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<S, I, P, L> {
    sessions: Arc<SessionManager<S, I, P>>,
    storage: Arc<L>,
    codec: TokenCodec,
    config: TokenConfig,
    cache: Mutex<Option<TokenPair>>,
    refresh: tokio::sync::Mutex<RefreshSlot>,
}

impl<S, I, P, L> TokenManager<S, I, P, L>
where
    S: DocumentStore,
    I: IdentityProvider,
    P: DevicePlatform,
    L: LocalStorage,
{
    pub fn new(
        sessions: Arc<SessionManager<S, I, P>>,
        storage: Arc<L>,
        config: TokenConfig,
    ) -> Self {
        let codec = TokenCodec::new(config.signing_secret.as_bytes());
        Self {
            inner: Arc::new(Inner {
                sessions,
                storage,
                codec,
                config,
                cache: Mutex::new(None),
                refresh: tokio::sync::Mutex::new(RefreshSlot {
                    state: RefreshState::Idle,
                    next_generation: 0,
                }),
            }),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager<S, I, P>> {
        &self.inner.sessions
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.inner.codec
    }

    /// The cached pair, without touching local storage.
    pub fn cached(&self) -> Option<TokenPair> {
        self.inner.cache.lock().clone()
    }

    /// Current lifecycle state, for inspection and logging.
    pub async fn state(&self) -> TokenState {
        if matches!(
            self.inner.refresh.lock().await.state,
            RefreshState::Refreshing { .. }
        ) {
            return TokenState::Refreshing;
        }
        match self.cached() {
            None => TokenState::NoTokens,
            Some(pair) if TokenCodec::is_expired(&pair.access) => TokenState::Expired,
            Some(_) => TokenState::Valid,
        }
    }

    /// Mints an access/refresh pair for `user`, bound to this device.
    ///
    /// Pure: nothing is cached or written.
    pub fn issue_tokens(
        &self,
        user: &AuthUser,
        role: Option<&Role>,
    ) -> Result<TokenPair, TokenError> {
        self.inner.issue_tokens(user, role)
    }

    /// Writes `pair` to local storage and the cache, then records its
    /// fingerprints on the session record.
    ///
    /// The fingerprint write is audit-only: its failure is logged, not
    /// returned.
    pub async fn persist(&self, pair: &TokenPair) -> Result<(), TokenError> {
        self.inner.persist(pair).await
    }

    /// Loads the stored pair into the cache.
    ///
    /// `None` unless both tokens are present.
    pub async fn load_persisted(&self) -> Result<Option<PersistedTokens>, TokenError> {
        self.inner.load_persisted().await
    }

    /// Returns an unexpired access token, refreshing if needed.
    ///
    /// Joins the in-flight refresh if there is one.
    ///
    /// # Errors
    /// [`TokenError::RefreshFailure`] when no valid access token can be
    /// produced. Local tokens are already cleared at that point.
    pub async fn get_valid_access_token(&self) -> Result<String, TokenError> {
        if self.cached().is_none() {
            self.inner.load_persisted().await?;
        }

        let future = {
            let mut slot = self.inner.refresh.lock().await;
            match slot.in_flight() {
                Some(future) => future,
                None => {
                    let cached = self.cached().map(|pair| pair.access);
                    if let Some(access) = cached.filter(|t| !TokenCodec::is_expired(t)) {
                        return Ok(access);
                    }
                    self.start_refresh(&mut slot)
                }
            }
        };
        future.await
    }

    /// Forces a refresh, or joins the one already running.
    pub async fn refresh_access_token(&self) -> Result<String, TokenError> {
        let future = {
            let mut slot = self.inner.refresh.lock().await;
            match slot.in_flight() {
                Some(future) => future,
                None => self.start_refresh(&mut slot),
            }
        };
        future.await
    }

    /// Wipes local tokens and the cache, and deactivates this device's
    /// session (best-effort).
    pub async fn clear_tokens(&self) -> Result<(), TokenError> {
        self.inner.clear_tokens().await
    }

    /// Installs a new refresh future in `slot` and returns it.
    ///
    /// The refresh runs on its own task, so it completes (and clears its
    /// marker) even if every caller awaiting it is cancelled.
    fn start_refresh(&self, slot: &mut RefreshSlot) -> RefreshFuture {
        slot.next_generation += 1;
        let generation = slot.next_generation;
        let inner = Arc::clone(&self.inner);

        let task = tokio::spawn(async move {
            let result = inner.refresh_flow().await;
            let mut slot = inner.refresh.lock().await;
            if matches!(
                slot.state,
                RefreshState::Refreshing { generation: g, .. } if g == generation
            ) {
                slot.state = RefreshState::Idle;
            }
            result
        });

        let future = task
            .map(|joined| {
                joined.unwrap_or_else(|e| {
                    Err(TokenError::refresh(format!("refresh task aborted: {e}")))
                })
            })
            .boxed()
            .shared();

        tracing::debug!(generation, "token refresh started");
        slot.state = RefreshState::Refreshing {
            generation,
            future: future.clone(),
        };
        future
    }
}

impl<S, I, P, L> Inner<S, I, P, L>
where
    S: DocumentStore,
    I: IdentityProvider,
    P: DevicePlatform,
    L: LocalStorage,
{
    fn issue_tokens(
        &self,
        user: &AuthUser,
        role: Option<&Role>,
    ) -> Result<TokenPair, TokenError> {
        let device_id = self.sessions.device_id().ok_or_else(|| {
            SessionError::IdentityUnavailable("device id not resolved".into())
        })?;

        let access = self.codec.encode(
            &Claims::access(
                user.uid.clone(),
                user.email.clone(),
                role.cloned(),
                device_id.clone(),
            ),
            self.config.access_ttl,
        )?;
        let refresh = self.codec.encode(
            &Claims::refresh(user.uid.clone(), device_id),
            self.config.refresh_ttl,
        )?;

        Ok(TokenPair { access, refresh })
    }

    async fn persist(&self, pair: &TokenPair) -> Result<(), TokenError> {
        let stored_at = Utc::now().timestamp_millis().to_string();
        self.storage
            .set_many(&[
                (ACCESS_TOKEN_KEY, pair.access.clone()),
                (REFRESH_TOKEN_KEY, pair.refresh.clone()),
                (TOKEN_TIMESTAMP_KEY, stored_at),
            ])
            .await?;
        *self.cache.lock() = Some(pair.clone());

        if let Some(claims) = TokenCodec::decode(&pair.access) {
            let audit = self
                .sessions
                .record_token_fingerprints(
                    &claims.uid,
                    &claims.device_id,
                    &fingerprint(&pair.access),
                    &fingerprint(&pair.refresh),
                )
                .await;
            if let Err(e) = audit {
                tracing::warn!(error = %e, "failed to record token fingerprints");
            }
        }
        Ok(())
    }

    async fn load_persisted(&self) -> Result<Option<PersistedTokens>, TokenError> {
        let values = self.storage.get_many(&TOKEN_KEYS).await?;
        let [access, refresh, stored_at]: [Option<String>; 3] =
            values.try_into().unwrap_or_default();

        let (Some(access), Some(refresh)) = (access, refresh) else {
            return Ok(None);
        };
        let pair = TokenPair { access, refresh };
        *self.cache.lock() = Some(pair.clone());

        let stored_at = stored_at
            .and_then(|ms| ms.parse::<i64>().ok())
            .and_then(DateTime::<Utc>::from_timestamp_millis);
        Ok(Some(PersistedTokens { pair, stored_at }))
    }

    async fn clear_tokens(&self) -> Result<(), TokenError> {
        self.cache.lock().take();
        let removed = self.storage.remove_many(&TOKEN_KEYS).await;
        if let Err(e) = self.sessions.deactivate().await {
            tracing::warn!(error = %e, "failed to deactivate session while clearing tokens");
        }
        removed?;
        tracing::debug!("tokens cleared");
        Ok(())
    }

    async fn refresh_flow(&self) -> Result<String, TokenError> {
        match self.try_refresh().await {
            Ok(pair) => {
                tracing::info!("access token refreshed");
                Ok(pair.access)
            }
            Err(e) => {
                tracing::warn!(error = %e, "token refresh failed, clearing tokens");
                if let Err(clear) = self.clear_tokens().await {
                    tracing::warn!(error = %clear, "failed to clear tokens");
                }
                Err(e)
            }
        }
    }

    async fn current_refresh_token(&self) -> Result<String, TokenError> {
        let cached = self.cache.lock().clone();
        if let Some(pair) = cached {
            return Ok(pair.refresh);
        }
        self.load_persisted()
            .await
            .map_err(|e| TokenError::refresh(e.to_string()))?
            .map(|persisted| persisted.pair.refresh)
            .ok_or_else(|| TokenError::refresh("no refresh token"))
    }

    async fn try_refresh(&self) -> Result<TokenPair, TokenError> {
        let refresh = self.current_refresh_token().await?;

        let claims = TokenCodec::try_decode(&refresh)
            .map_err(|e| TokenError::refresh(e.to_string()))?;
        if claims.token_type != Some(TokenType::Refresh) {
            return Err(TokenError::refresh("not a refresh token"));
        }
        if !self.codec.verify(&refresh) {
            return Err(TokenError::refresh("refresh token signature invalid"));
        }
        if claims.is_expired_at(Utc::now().timestamp()) {
            return Err(TokenError::refresh("refresh token expired"));
        }

        let user = self
            .sessions
            .identity()
            .current_user()
            .ok_or_else(|| TokenError::refresh("no authenticated user"))?;
        if user.uid != claims.uid {
            return Err(TokenError::refresh("refresh token issued to another user"));
        }

        self.sessions
            .require_live()
            .await
            .map_err(|e| TokenError::refresh(e.to_string()))?;

        let role = self
            .sessions
            .user_role(&user.uid)
            .await
            .map_err(|e| TokenError::refresh(e.to_string()))?;

        let pair = self.issue_tokens(&user, role.as_ref())?;
        self.persist(&pair)
            .await
            .map_err(|e| TokenError::refresh(e.to_string()))?;

        if let Err(e) = self.sessions.touch_activity().await {
            tracing::warn!(error = %e, "failed to touch session after refresh");
        }
        Ok(pair)
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use mentora_protocol::DeviceId;
    use mentora_session::{MemoryIdentityProvider, SessionConfig, StaticPlatform};
    use mentora_store::{MemoryLocalStorage, MemoryStore};

    use super::*;

    type Manager = TokenManager<MemoryStore, MemoryIdentityProvider, StaticPlatform, MemoryLocalStorage>;

    fn manager() -> (Arc<MemoryLocalStorage>, Manager) {
        let store = Arc::new(MemoryStore::new());
        let identity = Arc::new(MemoryIdentityProvider::signed_in(AuthUser::new(
            "u1",
            Some("u1@example.com"),
        )));
        let sessions = Arc::new(SessionManager::new(
            store,
            identity,
            Arc::new(StaticPlatform::new("android", "1.0.0")),
            SessionConfig::default(),
        ));
        sessions.set_device_id(DeviceId::new("d1"));
        let storage = Arc::new(MemoryLocalStorage::new());
        let tokens = TokenManager::new(sessions, Arc::clone(&storage), TokenConfig::default());
        (storage, tokens)
    }

    #[tokio::test]
    async fn test_issue_tokens_binds_device_and_role() {
        let (_, tokens) = manager();
        let user = AuthUser::new("u1", Some("u1@example.com"));

        let pair = tokens.issue_tokens(&user, Some(&Role::new("mentor"))).unwrap();

        let access = TokenCodec::decode(&pair.access).unwrap();
        assert_eq!(access.device_id.as_str(), "d1");
        assert_eq!(access.role, Some(Role::new("mentor")));
        assert_eq!(access.token_type, Some(TokenType::Access));

        let refresh = TokenCodec::decode(&pair.refresh).unwrap();
        assert_eq!(refresh.token_type, Some(TokenType::Refresh));
        assert!(refresh.exp > access.exp);
        assert!(tokens.cached().is_none(), "issuing does not cache");
    }

    #[tokio::test]
    async fn test_issue_tokens_without_device_returns_session_error() {
        let store = Arc::new(MemoryStore::new());
        let sessions = Arc::new(SessionManager::new(
            store,
            Arc::new(MemoryIdentityProvider::new()),
            Arc::new(StaticPlatform::new("ios", "1.0.0")),
            SessionConfig::default(),
        ));
        let tokens: Manager = TokenManager::new(
            sessions,
            Arc::new(MemoryLocalStorage::new()),
            TokenConfig::default(),
        );

        let err = tokens.issue_tokens(&AuthUser::new("u1", None), None).unwrap_err();
        assert!(matches!(
            err,
            TokenError::Session(SessionError::IdentityUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_persist_then_load_round_trips_pair() {
        let (storage, tokens) = manager();
        let pair = tokens.issue_tokens(&AuthUser::new("u1", None), None).unwrap();

        tokens.persist(&pair).await.unwrap();
        assert!(storage.peek(TOKEN_TIMESTAMP_KEY).is_some());

        let loaded = tokens.load_persisted().await.unwrap().unwrap();
        assert_eq!(loaded.pair, pair);
        assert!(loaded.stored_at.is_some());
    }

    #[tokio::test]
    async fn test_load_persisted_partial_pair_returns_none() {
        let (storage, tokens) = manager();
        storage
            .set_many(&[(ACCESS_TOKEN_KEY, "only-access".into())])
            .await
            .unwrap();

        assert!(tokens.load_persisted().await.unwrap().is_none());
        assert!(tokens.cached().is_none());
    }

    #[tokio::test]
    async fn test_state_follows_cache() {
        let (_, tokens) = manager();
        assert_eq!(tokens.state().await, TokenState::NoTokens);

        let pair = tokens.issue_tokens(&AuthUser::new("u1", None), None).unwrap();
        tokens.persist(&pair).await.unwrap();
        assert_eq!(tokens.state().await, TokenState::Valid);
    }

    #[tokio::test]
    async fn test_clear_tokens_removes_all_keys() {
        let (storage, tokens) = manager();
        let pair = tokens.issue_tokens(&AuthUser::new("u1", None), None).unwrap();
        tokens.persist(&pair).await.unwrap();

        tokens.clear_tokens().await.unwrap();

        for key in TOKEN_KEYS {
            assert!(storage.peek(key).is_none(), "{key} should be removed");
        }
        assert!(tokens.cached().is_none());
    }

    #[tokio::test]
    async fn test_get_valid_access_token_without_tokens_returns_refresh_failure() {
        let (_, tokens) = manager();
        let err = tokens.get_valid_access_token().await.unwrap_err();
        assert!(matches!(err, TokenError::RefreshFailure(_)));
    }
}
