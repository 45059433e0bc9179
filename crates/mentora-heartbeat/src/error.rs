//! Error types for the heartbeat.

/// Errors returned by a [`HeartbeatHandle`](crate::HeartbeatHandle).
#[derive(Debug, Clone, thiserror::Error)]
pub enum HeartbeatError {
    /// The heartbeat task has stopped (shut down or panicked).
    #[error("heartbeat is not running")]
    Stopped,
}
