//! Access/refresh token lifecycle for Mentora.
//!
//! [`TokenManager`] mints token pairs on sign-in, caches and persists
//! them, and hands out a valid access token on demand, refreshing when the
//! cached one has expired. It is the single choke point every
//! authenticated operation goes through.
//!
//! # Refresh is single-flight
//!
//! ```text
//! caller A ─┐
//! caller B ─┼──→ RefreshState::Refreshing(shared) ──→ same Result for all
//! caller C ─┘
//! ```
//!
//! The first caller that finds the access token expired installs a shared
//! future; everyone else arriving before it completes awaits that same
//! future instead of starting another refresh.

mod config;
mod error;
mod manager;

pub use config::{PersistedTokens, TokenConfig, TokenState};
pub use error::TokenError;
pub use manager::{ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, TOKEN_TIMESTAMP_KEY, TokenManager};
