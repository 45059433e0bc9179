//! # Mentora
//!
//! Device-scoped session and token lifecycle for the Mentora mobile client.
//!
//! Each signed-in device gets its own session record, its own
//! access/refresh token pair, and an activity heartbeat that keeps the
//! session alive while the app is in use. Sessions can be revoked per
//! device or all at once; a revoked or idle session is noticed the next
//! time the app comes to the foreground or refreshes its tokens.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mentora::prelude::*;
//!
//! let client = SessionClient::builder()
//!     .token_config(TokenConfig::from_env())
//!     .build(store, identity, platform, storage);
//!
//! let _listener = client.watch_auth_state();
//! let snapshot = client.restore().await?;
//! let heartbeat = client.start_heartbeat();
//!
//! let token = client.get_valid_access_token().await?;
//! heartbeat.transition(AppLifecycle::Background).await?;
//! ```

mod client;
mod error;
mod listener;

pub use client::{SessionClient, SessionClientBuilder, SessionEvent, SessionSnapshot};
pub use error::MentoraError;
pub use listener::AuthListener;

pub use mentora_heartbeat as heartbeat;
pub use mentora_protocol as protocol;
pub use mentora_session as session;
pub use mentora_store as store;
pub use mentora_token as token;

pub mod prelude {
    pub use crate::{
        AuthListener, MentoraError, SessionClient, SessionClientBuilder, SessionEvent,
        SessionSnapshot,
    };
    pub use mentora_heartbeat::{AppLifecycle, HeartbeatConfig, HeartbeatHandle};
    pub use mentora_protocol::{AuthUser, DeviceId, Role, SessionRecord, TokenPair, UserId};
    pub use mentora_session::{
        DevicePlatform, IdentityProvider, MemoryIdentityProvider, SessionConfig,
        StaticPlatform,
    };
    pub use mentora_store::{DocumentStore, LocalStorage, MemoryLocalStorage, MemoryStore};
    pub use mentora_token::TokenConfig;
}
