//! End-to-end tests for `SessionClient`.
//!
//! Each "device" is its own client with its own local storage and
//! identity provider; devices of the same user share one document store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mentora::heartbeat::HeartbeatTarget;
use mentora::prelude::*;
use mentora::protocol::{Claims, TokenCodec};
use mentora::session::SessionError;
use mentora::store::StoreOp;
use mentora::token::{ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
use serde_json::json;
use tokio::sync::broadcast::error::TryRecvError;

type Client =
    SessionClient<MemoryStore, MemoryIdentityProvider, StaticPlatform, MemoryLocalStorage>;

// =========================================================================
// Helpers
// =========================================================================

struct Device {
    identity: Arc<MemoryIdentityProvider>,
    storage: Arc<MemoryLocalStorage>,
    client: Client,
}

fn heartbeat_config() -> HeartbeatConfig {
    HeartbeatConfig {
        initial_jitter: Duration::ZERO,
        ..HeartbeatConfig::default()
    }
}

/// A device whose platform reports `device` as its unique id.
fn device_with(
    store: &Arc<MemoryStore>,
    device: &str,
    identity: Arc<MemoryIdentityProvider>,
    storage: Arc<MemoryLocalStorage>,
) -> Device {
    let platform = StaticPlatform::new("android", "1.0.0").with_unique_id(device);
    let client = SessionClient::builder()
        .heartbeat_config(heartbeat_config())
        .build(
            Arc::clone(store),
            Arc::clone(&identity),
            Arc::new(platform),
            Arc::clone(&storage),
        );
    Device {
        identity,
        storage,
        client,
    }
}

/// A device with `u1` already signed in at the provider.
fn signed_in_device(store: &Arc<MemoryStore>, device: &str) -> Device {
    let identity = Arc::new(MemoryIdentityProvider::signed_in(AuthUser::new(
        "u1",
        Some("u1@example.com"),
    )));
    device_with(store, device, identity, Arc::new(MemoryLocalStorage::new()))
}

fn store_with_profile() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    let serde_json::Value::Object(fields) = json!({"role": "mentee"}) else {
        unreachable!()
    };
    store.insert("users", "u1", fields);
    store
}

fn seed_session(store: &MemoryStore, key: &str, days_idle: i64) {
    let last = Utc::now() - chrono::Duration::days(days_idle);
    let data = json!({
        "userId": "u1",
        "deviceInfo": {
            "deviceId": "d1",
            "platform": "android",
            "osVersion": "14",
            "appVersion": "1.0.0",
            "brand": "Pixel",
            "model": "8",
        },
        "createdAt": last.timestamp_millis(),
        "lastActivity": last.timestamp_millis(),
        "isActive": true,
    });
    let serde_json::Value::Object(fields) = data else {
        unreachable!()
    };
    store.insert("userSessions", key, fields);
}

fn session_field(store: &MemoryStore, key: &str, field: &str) -> Option<serde_json::Value> {
    store
        .snapshot("userSessions", key)
        .and_then(|f| f.get(field).cloned())
}

fn is_active(store: &MemoryStore, key: &str) -> Option<bool> {
    session_field(store, key, "isActive").and_then(|v| v.as_bool())
}

fn expired_access(codec: &TokenCodec) -> String {
    let now = Utc::now().timestamp();
    let mut claims = Claims::access(
        UserId::new("u1"),
        None,
        Some(Role::new("mentee")),
        DeviceId::new("d1"),
    );
    claims.iat = Some(now - 3600);
    claims.exp = Some(now - 60);
    codec.sign(&claims).unwrap()
}

// =========================================================================
// Sign-in
// =========================================================================

#[tokio::test]
async fn test_on_signed_in_fresh_device_creates_live_session_and_tokens() {
    let store = store_with_profile();
    let d1 = signed_in_device(&store, "d1");
    let mut events = d1.client.events();

    let record = d1.client.on_signed_in().await.unwrap();

    assert_eq!(record.id, "u1_d1");
    assert!(record.is_active);
    assert_eq!(is_active(&store, "u1_d1"), Some(true));
    assert!(session_field(&store, "u1_d1", "createdAt").is_some());
    assert!(session_field(&store, "u1_d1", "accessTokenHash").is_some());

    let access = d1.storage.peek(ACCESS_TOKEN_KEY).unwrap();
    assert!(d1.storage.peek(REFRESH_TOKEN_KEY).is_some());
    let claims = TokenCodec::decode(&access).unwrap();
    assert_eq!(claims.role, Some(Role::new("mentee")));
    assert_eq!(claims.device_id, DeviceId::new("d1"));

    assert_eq!(
        events.try_recv().unwrap(),
        SessionEvent::SignedIn {
            user_id: UserId::new("u1")
        }
    );
}

#[tokio::test]
async fn test_on_signed_in_without_profile_issues_tokens_without_role() {
    let store = Arc::new(MemoryStore::new());
    let d1 = signed_in_device(&store, "d1");

    d1.client.on_signed_in().await.unwrap();

    let access = d1.client.get_valid_access_token().await.unwrap();
    assert_eq!(TokenCodec::decode(&access).unwrap().role, None);
}

#[tokio::test]
async fn test_on_signed_in_no_user_returns_not_authenticated() {
    let store = Arc::new(MemoryStore::new());
    let d1 = device_with(
        &store,
        "d1",
        Arc::new(MemoryIdentityProvider::new()),
        Arc::new(MemoryLocalStorage::new()),
    );

    let err = d1.client.on_signed_in().await.unwrap_err();

    assert!(matches!(
        err,
        MentoraError::Session(SessionError::NotAuthenticated)
    ));
    assert!(store.snapshot("userSessions", "u1_d1").is_none());
}

// =========================================================================
// Startup
// =========================================================================

#[tokio::test]
async fn test_initialize_session_signed_out_is_invalid() {
    let store = Arc::new(MemoryStore::new());
    let d1 = device_with(
        &store,
        "d1",
        Arc::new(MemoryIdentityProvider::new()),
        Arc::new(MemoryLocalStorage::new()),
    );

    let snapshot = d1.client.initialize_session().await.unwrap();

    assert!(!snapshot.valid);
    assert!(snapshot.session.is_none());
}

#[tokio::test]
async fn test_initialize_session_storage_failure_is_fatal() {
    let store = Arc::new(MemoryStore::new());
    let storage = Arc::new(MemoryLocalStorage::new());
    storage.set_failing(true);
    let identity = Arc::new(MemoryIdentityProvider::signed_in(AuthUser::new("u1", None)));
    let d1 = device_with(&store, "d1", identity, storage);

    let err = d1.client.initialize_session().await.unwrap_err();

    assert!(matches!(
        err,
        MentoraError::Session(SessionError::IdentityUnavailable(_))
    ));
}

#[tokio::test]
async fn test_restore_after_restart_reuses_persisted_tokens() {
    let store = store_with_profile();
    let first = signed_in_device(&store, "d1");
    first.client.on_signed_in().await.unwrap();
    let access = first.storage.peek(ACCESS_TOKEN_KEY).unwrap();

    // Same provider and storage, fresh process.
    let second = device_with(
        &store,
        "d1",
        Arc::clone(&first.identity),
        Arc::clone(&first.storage),
    );
    let snapshot = second.client.restore().await.unwrap();

    assert!(snapshot.valid);
    assert_eq!(snapshot.session.map(|s| s.id), Some("u1_d1".into()));
    assert_eq!(second.client.get_valid_access_token().await.unwrap(), access);
}

#[tokio::test]
async fn test_restore_without_persisted_tokens_issues_new_pair() {
    let store = store_with_profile();
    seed_session(&store, "u1_d1", 1);
    let d1 = signed_in_device(&store, "d1");

    let snapshot = d1.client.restore().await.unwrap();

    assert!(snapshot.valid);
    assert!(d1.storage.peek(ACCESS_TOKEN_KEY).is_some());
    assert!(d1.storage.peek(REFRESH_TOKEN_KEY).is_some());
}

#[tokio::test]
async fn test_restore_idle_session_expires_and_signs_out() {
    let store = store_with_profile();
    seed_session(&store, "u1_d1", 31);
    let d1 = signed_in_device(&store, "d1");
    let mut events = d1.client.events();

    let snapshot = d1.client.restore().await.unwrap();

    assert!(!snapshot.valid);
    assert_eq!(is_active(&store, "u1_d1"), Some(false));
    assert!(d1.identity.current_user().is_none());
    assert_eq!(events.try_recv().unwrap(), SessionEvent::Expired);
}

// =========================================================================
// Tokens
// =========================================================================

#[tokio::test]
async fn test_get_valid_access_token_revoked_session_expires() {
    let store = store_with_profile();
    let d1 = signed_in_device(&store, "d1");
    d1.client.on_signed_in().await.unwrap();

    // Revoked elsewhere while the access token aged out.
    let refresh = d1.storage.peek(REFRESH_TOKEN_KEY).unwrap();
    let pair = TokenPair {
        access: expired_access(d1.client.tokens().codec()),
        refresh,
    };
    d1.client.tokens().persist(&pair).await.unwrap();
    d1.client.sessions().logout_device(&DeviceId::new("d1")).await.unwrap();
    let mut events = d1.client.events();

    let err = d1.client.get_valid_access_token().await.unwrap_err();

    assert!(err.requires_reauth());
    assert!(d1.storage.peek(ACCESS_TOKEN_KEY).is_none());
    assert!(d1.identity.current_user().is_none());
    assert_eq!(events.try_recv().unwrap(), SessionEvent::Expired);
}

// =========================================================================
// Heartbeat ticks
// =========================================================================

#[tokio::test]
async fn test_refresh_tick_store_offline_keeps_user_signed_in() {
    let store = store_with_profile();
    let d1 = signed_in_device(&store, "d1");
    d1.client.on_signed_in().await.unwrap();
    let pair = TokenPair {
        access: expired_access(d1.client.tokens().codec()),
        refresh: d1.storage.peek(REFRESH_TOKEN_KEY).unwrap(),
    };
    d1.client.tokens().persist(&pair).await.unwrap();
    let mut events = d1.client.events();
    store.set_offline(true);

    let result = HeartbeatTarget::refresh_tokens(&d1.client).await;

    assert!(result.is_err());
    assert!(d1.identity.current_user().is_some());
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn test_refresh_tick_valid_token_touches_activity() {
    let store = store_with_profile();
    let d1 = signed_in_device(&store, "d1");
    d1.client.on_signed_in().await.unwrap();
    let access = d1.storage.peek(ACCESS_TOKEN_KEY).unwrap();
    let updates_before = store.count(StoreOp::Update, "userSessions");

    HeartbeatTarget::refresh_tokens(&d1.client).await.unwrap();

    assert_eq!(store.count(StoreOp::Update, "userSessions"), updates_before + 1);
    assert_eq!(d1.storage.peek(ACCESS_TOKEN_KEY), Some(access));
}

// =========================================================================
// Session listing and revocation
// =========================================================================

#[tokio::test]
async fn test_get_user_sessions_lists_all_devices() {
    let store = store_with_profile();
    let d1 = signed_in_device(&store, "d1");
    let d2 = signed_in_device(&store, "d2");
    d1.client.on_signed_in().await.unwrap();
    d2.client.on_signed_in().await.unwrap();
    d1.client.logout_device(&DeviceId::new("d2")).await.unwrap();

    let all = d1.client.get_user_sessions().await.unwrap();
    let active = d1.client.get_active_sessions().await.unwrap();

    assert_eq!(all.len(), 2);
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, "u1_d1");
}

#[tokio::test]
async fn test_get_user_sessions_signed_out_returns_not_authenticated() {
    let store = Arc::new(MemoryStore::new());
    let d1 = device_with(
        &store,
        "d1",
        Arc::new(MemoryIdentityProvider::new()),
        Arc::new(MemoryLocalStorage::new()),
    );

    let err = d1.client.get_user_sessions().await.unwrap_err();

    assert!(err.requires_reauth());
}

#[tokio::test]
async fn test_logout_device_own_device_signs_out() {
    let store = store_with_profile();
    let d1 = signed_in_device(&store, "d1");
    d1.client.on_signed_in().await.unwrap();
    let mut events = d1.client.events();

    d1.client.logout_device(&DeviceId::new("d1")).await.unwrap();

    assert_eq!(is_active(&store, "u1_d1"), Some(false));
    assert!(session_field(&store, "u1_d1", "deactivatedAt").is_some());
    assert!(d1.storage.peek(ACCESS_TOKEN_KEY).is_none());
    assert!(d1.client.current_session().is_none());
    assert!(d1.identity.current_user().is_none());
    assert_eq!(events.try_recv().unwrap(), SessionEvent::SignedOut);
}

#[tokio::test]
async fn test_logout_device_other_device_keeps_own_session() {
    let store = store_with_profile();
    let d1 = signed_in_device(&store, "d1");
    let d2 = signed_in_device(&store, "d2");
    d1.client.on_signed_in().await.unwrap();
    d2.client.on_signed_in().await.unwrap();

    d1.client.logout_device(&DeviceId::new("d2")).await.unwrap();

    assert_eq!(is_active(&store, "u1_d1"), Some(true));
    assert_eq!(is_active(&store, "u1_d2"), Some(false));
    assert!(d1.identity.current_user().is_some());
}

#[tokio::test]
async fn test_logout_all_devices_is_noticed_on_foreground() {
    let store = store_with_profile();
    let d1 = signed_in_device(&store, "d1");
    let d2 = signed_in_device(&store, "d2");
    d1.client.on_signed_in().await.unwrap();
    d2.client.on_signed_in().await.unwrap();

    let heartbeat = d1.client.start_heartbeat();
    heartbeat.transition(AppLifecycle::Background).await.unwrap();

    let revoked = d2.client.logout_all_devices().await.unwrap();
    assert_eq!(revoked, 2);
    assert_eq!(is_active(&store, "u1_d1"), Some(false));
    assert_eq!(is_active(&store, "u1_d2"), Some(false));
    assert!(d2.identity.current_user().is_none());

    let mut events = d1.client.events();
    heartbeat.transition(AppLifecycle::Active).await.unwrap();

    assert_eq!(events.try_recv().unwrap(), SessionEvent::Expired);
    assert!(d1.identity.current_user().is_none());
    assert!(d1.storage.peek(ACCESS_TOKEN_KEY).is_none());

    heartbeat.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_sign_out_twice_is_harmless() {
    let store = store_with_profile();
    let d1 = signed_in_device(&store, "d1");
    d1.client.on_signed_in().await.unwrap();

    d1.client.sign_out().await.unwrap();
    d1.client.sign_out().await.unwrap();

    assert_eq!(is_active(&store, "u1_d1"), Some(false));
}

// =========================================================================
// Auth-state listener
// =========================================================================

#[tokio::test]
async fn test_watch_auth_state_follows_provider() {
    let store = store_with_profile();
    let identity = Arc::new(MemoryIdentityProvider::new());
    let d1 = device_with(
        &store,
        "d1",
        Arc::clone(&identity),
        Arc::new(MemoryLocalStorage::new()),
    );
    let mut events = d1.client.events();
    let listener = d1.client.watch_auth_state();

    identity.sign_in(AuthUser::new("u1", None));
    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        event,
        SessionEvent::SignedIn {
            user_id: UserId::new("u1")
        }
    );
    assert_eq!(is_active(&store, "u1_d1"), Some(true));

    identity.sign_out().await.unwrap();
    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event, SessionEvent::SignedOut);
    assert!(d1.storage.peek(ACCESS_TOKEN_KEY).is_none());

    listener.stop();
}

#[tokio::test]
async fn test_watch_auth_state_own_sign_out_emits_once() {
    let store = store_with_profile();
    let d1 = signed_in_device(&store, "d1");
    d1.client.on_signed_in().await.unwrap();
    let listener = d1.client.watch_auth_state();
    let mut events = d1.client.events();

    d1.client.sign_out().await.unwrap();
    // Let the listener observe the provider sign-out.
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(events.try_recv().unwrap(), SessionEvent::SignedOut);
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    assert!(!listener.is_finished());
    listener.stop();
}
