//! Reacts to identity-provider sign-in and sign-out.

use mentora_session::{DevicePlatform, IdentityProvider};
use mentora_store::{DocumentStore, LocalStorage};
use tokio::task::JoinHandle;

use crate::SessionClient;

/// A running auth-state listener. Dropping it leaves the listener
/// running; call [`stop`](Self::stop) to end it.
pub struct AuthListener {
    task: JoinHandle<()>,
}

impl AuthListener {
    /// Stops listening. Work already in progress is cancelled.
    pub fn stop(self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl<S, I, P, L> SessionClient<S, I, P, L>
where
    S: DocumentStore,
    I: IdentityProvider,
    P: DevicePlatform,
    L: LocalStorage,
{
    /// Follows the identity provider's auth state.
    ///
    /// A sign-in establishes the session and issues tokens. A sign-out
    /// clears local state. Only changes after this call are seen; a user
    /// who was already signed in at startup goes through
    /// [`restore`](Self::restore) instead.
    pub fn watch_auth_state(&self) -> AuthListener {
        let client = self.clone();
        let mut subscription = self.identity().subscribe();

        let task = tokio::spawn(async move {
            tracing::debug!("auth listener started");
            while let Some(change) = subscription.next().await {
                match change {
                    Some(user) => {
                        tracing::debug!(uid = %user.uid, "provider signed in");
                        if let Err(e) = client.on_signed_in().await {
                            tracing::warn!(uid = %user.uid, error = %e, "failed to establish session");
                        }
                    }
                    None => {
                        tracing::debug!("provider signed out");
                        client.on_signed_out().await;
                    }
                }
            }
            subscription.unsubscribe();
            tracing::debug!("auth listener stopped");
        });

        AuthListener { task }
    }
}
