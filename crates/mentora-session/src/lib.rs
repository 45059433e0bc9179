//! Device identity and session record management for Mentora.
//!
//! This crate handles the server-side half of a device's sign-in:
//!
//! 1. **Device identity** — a stable per-install id ([`DeviceIdentity`])
//! 2. **Identity provider seam** — who is signed in ([`IdentityProvider`])
//! 3. **Session records** — one document per user-device pair, with
//!    validation, idle expiry, and single/multi-device logout
//!    ([`SessionManager`])
//!
//! # How it fits in the stack
//!
//! ```text
//! Token / Heartbeat layers (above)  ← gate access on session liveness
//!     ↕
//! Session Layer (this crate)  ← owns the userSessions documents
//!     ↕
//! Store + Protocol (below)  ← documents, SessionRecord shape
//! ```

#![allow(async_fn_in_trait)]

mod auth;
mod device;
mod error;
mod manager;
mod session;

pub use auth::{AuthSubscription, IdentityProvider, MemoryIdentityProvider};
pub use device::{DEVICE_ID_KEY, DeviceIdentity, DevicePlatform, StaticPlatform};
pub use error::SessionError;
pub use manager::SessionManager;
pub use session::{SessionConfig, SessionStatus};
