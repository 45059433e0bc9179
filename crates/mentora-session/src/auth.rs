//! Identity provider seam.
//!
//! Mentora doesn't manage passwords or identities itself — that's the
//! hosted auth service's job. The session core only needs three things
//! from it: who is signed in right now, a stream of sign-in/sign-out
//! changes, and a way to sign the user out.
//!
//! Auth-state changes are delivered through an [`AuthSubscription`]: an
//! explicit stream object that always yields the *latest* state (no
//! queue, no back-pressure) and is cancelled by dropping it.

use std::future::Future;

use mentora_protocol::AuthUser;
use tokio::sync::watch;

use crate::SessionError;

/// The external authentication service.
///
/// # Trait bounds
///
/// `Send + Sync + 'static` because one provider is shared by the session
/// manager, the token manager, and background tasks.
pub trait IdentityProvider: Send + Sync + 'static {
    /// The currently signed-in user, if any.
    fn current_user(&self) -> Option<AuthUser>;

    /// Subscribes to auth-state changes.
    fn subscribe(&self) -> AuthSubscription;

    /// Signs the current user out of the provider.
    fn sign_out(&self) -> impl Future<Output = Result<(), SessionError>> + Send;
}

/// A live subscription to auth-state changes.
///
/// Dropping the subscription (or calling [`unsubscribe`](Self::unsubscribe))
/// cancels it; the provider never blocks on slow subscribers.
pub struct AuthSubscription {
    receiver: watch::Receiver<Option<AuthUser>>,
}

impl AuthSubscription {
    pub fn new(receiver: watch::Receiver<Option<AuthUser>>) -> Self {
        Self { receiver }
    }

    /// Waits for the next auth-state change and returns the new state.
    ///
    /// Intermediate states are coalesced: only the latest one is seen.
    /// Returns `None` once the provider has gone away.
    pub async fn next(&mut self) -> Option<Option<AuthUser>> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    /// The state as of now, without waiting.
    pub fn current(&self) -> Option<AuthUser> {
        self.receiver.borrow().clone()
    }

    /// Cancels the subscription.
    pub fn unsubscribe(self) {}
}

// ---------------------------------------------------------------------------
// MemoryIdentityProvider
// ---------------------------------------------------------------------------

/// An in-process [`IdentityProvider`] for tests and demos.
pub struct MemoryIdentityProvider {
    state: watch::Sender<Option<AuthUser>>,
}

impl MemoryIdentityProvider {
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        Self { state }
    }

    /// Starts with `user` already signed in.
    pub fn signed_in(user: AuthUser) -> Self {
        let (state, _) = watch::channel(Some(user));
        Self { state }
    }

    /// Signs `user` in and notifies subscribers.
    pub fn sign_in(&self, user: AuthUser) {
        tracing::debug!(uid = %user.uid, "identity provider: signed in");
        self.state.send_replace(Some(user));
    }
}

impl Default for MemoryIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityProvider for MemoryIdentityProvider {
    fn current_user(&self) -> Option<AuthUser> {
        self.state.borrow().clone()
    }

    fn subscribe(&self) -> AuthSubscription {
        AuthSubscription::new(self.state.subscribe())
    }

    async fn sign_out(&self) -> Result<(), SessionError> {
        if self.state.borrow().is_some() {
            tracing::debug!("identity provider: signed out");
            self.state.send_replace(None);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscription_sees_sign_in_and_sign_out() {
        let provider = MemoryIdentityProvider::new();
        let mut sub = provider.subscribe();
        assert!(sub.current().is_none());

        provider.sign_in(AuthUser::new("u1", Some("u1@example.com")));
        let state = sub.next().await.expect("provider alive");
        assert_eq!(state.map(|u| u.uid.0), Some("u1".to_string()));

        provider.sign_out().await.unwrap();
        let state = sub.next().await.expect("provider alive");
        assert!(state.is_none());
    }

    #[tokio::test]
    async fn test_subscription_coalesces_to_latest_state() {
        let provider = MemoryIdentityProvider::new();
        let mut sub = provider.subscribe();

        provider.sign_in(AuthUser::new("first", None));
        provider.sign_in(AuthUser::new("second", None));

        let state = sub.next().await.unwrap();
        assert_eq!(state.unwrap().uid.0, "second");
    }

    #[tokio::test]
    async fn test_subscription_ends_when_provider_dropped() {
        let provider = MemoryIdentityProvider::new();
        let mut sub = provider.subscribe();
        drop(provider);

        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_sign_out_when_signed_out_is_noop() {
        let provider = MemoryIdentityProvider::new();
        assert!(provider.sign_out().await.is_ok());
        assert!(provider.current_user().is_none());
    }
}
