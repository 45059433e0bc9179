//! Lifecycle-aware activity heartbeat for Mentora.
//!
//! While the app is in the foreground the heartbeat runs two periodic
//! timers: one that touches the session's `lastActivity` (default every
//! 5 minutes) and one that proactively refreshes tokens (default every
//! 25 minutes, ahead of the 30-minute access TTL). App lifecycle
//! transitions drive the rest:
//!
//! ```text
//!            background: pause timers, one activity touch
//!   Active ───────────────────────────────────────────→ Background
//!      ↑                                                     │
//!      └─────────────────────────────────────────────────────┘
//!            foreground: validate session, resume timers
//! ```
//!
//! The heartbeat itself knows nothing about sessions or tokens; it calls
//! into a [`HeartbeatTarget`]. Periodic failures are logged and
//! swallowed, and the next tick simply tries again.
//!
//! # Integration
//!
//! ```ignore
//! let handle = ActivityHeartbeat::spawn(Arc::new(client), HeartbeatConfig::default());
//! handle.transition(AppLifecycle::Background).await?;
//! handle.transition(AppLifecycle::Active).await?;
//! handle.shutdown().await?;
//! ```

#![allow(async_fn_in_trait)]

mod config;
mod error;
mod heartbeat;
mod timer;

pub use config::HeartbeatConfig;
pub use error::HeartbeatError;
pub use heartbeat::{
    ActivityHeartbeat, AppLifecycle, HeartbeatHandle, HeartbeatStatus,
    HeartbeatTarget, TargetError,
};
pub use timer::IntervalTimer;
