//! Heartbeat actor: a Tokio task that owns the timers.
//!
//! Lifecycle transitions arrive over an mpsc channel; each carries a
//! reply channel so the caller knows when the foreground/background work
//! has finished.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::{HeartbeatConfig, HeartbeatError, IntervalTimer};

/// Error type the target may return. The heartbeat only logs it.
pub type TargetError = Box<dyn std::error::Error + Send + Sync>;

/// Whether the app is visible to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppLifecycle {
    Active,
    Background,
}

impl std::fmt::Display for AppLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "Active"),
            Self::Background => write!(f, "Background"),
        }
    }
}

/// The work the heartbeat drives.
///
/// # Trait bounds
///
/// `Send + Sync + 'static` because the target is shared with the
/// heartbeat task through an `Arc`.
pub trait HeartbeatTarget: Send + Sync + 'static {
    /// Periodic: bump the session's last-activity timestamp.
    fn touch_activity(&self) -> impl Future<Output = Result<(), TargetError>> + Send;

    /// Periodic: refresh tokens ahead of expiry.
    fn refresh_tokens(&self) -> impl Future<Output = Result<(), TargetError>> + Send;

    /// The app came to the foreground: re-validate before continued use.
    fn on_foreground(&self) -> impl Future<Output = Result<(), TargetError>> + Send;

    /// The app went to the background: record activity one last time.
    fn on_background(&self) -> impl Future<Output = Result<(), TargetError>> + Send;
}

/// A snapshot of the heartbeat's counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatStatus {
    pub lifecycle: AppLifecycle,
    /// Periodic activity touches attempted.
    pub activity_ticks: u64,
    /// Periodic token refreshes attempted.
    pub refresh_ticks: u64,
    /// Target calls that returned an error (and were swallowed).
    pub failures: u64,
}

enum HeartbeatCommand {
    Transition {
        to: AppLifecycle,
        reply: oneshot::Sender<()>,
    },
    GetStatus {
        reply: oneshot::Sender<HeartbeatStatus>,
    },
    Shutdown,
}

/// Handle to a running heartbeat. Cheap to clone.
#[derive(Clone)]
pub struct HeartbeatHandle {
    sender: mpsc::Sender<HeartbeatCommand>,
}

impl HeartbeatHandle {
    /// Reports a lifecycle change and waits until it has been handled.
    ///
    /// Reporting the current state again is a no-op.
    pub async fn transition(&self, to: AppLifecycle) -> Result<(), HeartbeatError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(HeartbeatCommand::Transition { to, reply: reply_tx })
            .await
            .map_err(|_| HeartbeatError::Stopped)?;
        reply_rx.await.map_err(|_| HeartbeatError::Stopped)
    }

    pub async fn status(&self) -> Result<HeartbeatStatus, HeartbeatError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(HeartbeatCommand::GetStatus { reply: reply_tx })
            .await
            .map_err(|_| HeartbeatError::Stopped)?;
        reply_rx.await.map_err(|_| HeartbeatError::Stopped)
    }

    /// Stops the heartbeat. Timers stop with it.
    pub async fn shutdown(&self) -> Result<(), HeartbeatError> {
        self.sender
            .send(HeartbeatCommand::Shutdown)
            .await
            .map_err(|_| HeartbeatError::Stopped)
    }

    /// Returns `true` once the heartbeat task has exited.
    pub fn is_stopped(&self) -> bool {
        self.sender.is_closed()
    }
}

enum Event {
    Command(Option<HeartbeatCommand>),
    ActivityDue,
    RefreshDue,
}

/// The heartbeat task state.
pub struct ActivityHeartbeat<T> {
    target: Arc<T>,
    lifecycle: AppLifecycle,
    activity: IntervalTimer,
    refresh: IntervalTimer,
    failures: u64,
    receiver: mpsc::Receiver<HeartbeatCommand>,
}

impl<T: HeartbeatTarget> ActivityHeartbeat<T> {
    /// Spawns the heartbeat in the foreground state and returns a handle.
    pub fn spawn(target: Arc<T>, config: HeartbeatConfig) -> HeartbeatHandle {
        let config = config.validated();
        let (tx, rx) = mpsc::channel(16);

        let heartbeat = Self {
            target,
            lifecycle: AppLifecycle::Active,
            activity: IntervalTimer::new(
                "activity",
                config.activity_interval,
                config.initial_jitter,
            ),
            refresh: IntervalTimer::new(
                "refresh",
                config.refresh_interval,
                config.initial_jitter,
            ),
            failures: 0,
            receiver: rx,
        };
        tokio::spawn(heartbeat.run());

        HeartbeatHandle { sender: tx }
    }

    async fn run(mut self) {
        tracing::info!("activity heartbeat started");

        loop {
            let event = tokio::select! {
                cmd = self.receiver.recv() => Event::Command(cmd),
                _ = self.activity.wait() => Event::ActivityDue,
                _ = self.refresh.wait() => Event::RefreshDue,
            };

            match event {
                Event::ActivityDue => {
                    let result = self.target.touch_activity().await;
                    self.record("activity touch", result);
                }
                Event::RefreshDue => {
                    let result = self.target.refresh_tokens().await;
                    self.record("token refresh", result);
                }
                Event::Command(Some(HeartbeatCommand::Transition { to, reply })) => {
                    self.handle_transition(to).await;
                    let _ = reply.send(());
                }
                Event::Command(Some(HeartbeatCommand::GetStatus { reply })) => {
                    let _ = reply.send(self.status());
                }
                Event::Command(Some(HeartbeatCommand::Shutdown) | None) => break,
            }
        }

        tracing::info!("activity heartbeat stopped");
    }

    async fn handle_transition(&mut self, to: AppLifecycle) {
        if to == self.lifecycle {
            tracing::debug!(lifecycle = %to, "lifecycle unchanged");
            return;
        }
        tracing::debug!(from = %self.lifecycle, %to, "lifecycle transition");
        self.lifecycle = to;

        match to {
            AppLifecycle::Background => {
                self.activity.pause();
                self.refresh.pause();
                let result = self.target.on_background().await;
                self.record("background touch", result);
            }
            AppLifecycle::Active => {
                let result = self.target.on_foreground().await;
                self.record("foreground validation", result);
                self.activity.resume();
                self.refresh.resume();
            }
        }
    }

    fn record(&mut self, what: &str, result: Result<(), TargetError>) {
        if let Err(e) = result {
            self.failures += 1;
            tracing::warn!(error = %e, "heartbeat {what} failed");
        }
    }

    fn status(&self) -> HeartbeatStatus {
        HeartbeatStatus {
            lifecycle: self.lifecycle,
            activity_ticks: self.activity.fired(),
            refresh_ticks: self.refresh.fired(),
            failures: self.failures,
        }
    }
}
