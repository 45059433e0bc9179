//! Shared data model for the Mentora session core.
//!
//! This crate defines the "shapes" every other layer agrees on:
//!
//! - **Types** ([`UserId`], [`DeviceId`], [`SessionRecord`], [`DeviceInfo`],
//!   etc.) — the documents that live in the remote store and the identities
//!   they are keyed by.
//! - **Tokens** ([`TokenCodec`], [`Claims`]) — how access and refresh tokens
//!   are encoded, signed, decoded, and checked for expiry.
//! - **Errors** ([`ProtocolError`]) — what can go wrong while encoding or
//!   decoding tokens.
//!
//! # Architecture
//!
//! The protocol layer knows nothing about storage, timers, or identity
//! providers. It only knows what a session record looks like and how a
//! token string maps to claims.
//!
//! ```text
//! Store (documents) → Protocol (SessionRecord, Claims) → Session / Token managers
//! ```

mod error;
mod token;
mod types;

pub use error::ProtocolError;
pub use token::{
    fingerprint, parse_ttl, Claims, TokenCodec, TokenPair, TokenType,
    DEFAULT_TTL,
};
pub use types::{
    session_key, AuthUser, DeviceId, DeviceInfo, Role, SessionRecord, UserId,
};
