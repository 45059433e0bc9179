//! Heartbeat configuration.

use std::time::Duration;

use tracing::warn;

/// Timing for the heartbeat's periodic work.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// How often `lastActivity` is touched while in the foreground.
    /// Default: 5 minutes.
    pub activity_interval: Duration,

    /// How often tokens are proactively refreshed while in the
    /// foreground. Default: 25 minutes.
    pub refresh_interval: Duration,

    /// Random delay (0..max) added to each timer's first deadline so
    /// devices started together don't touch the store in lockstep.
    pub initial_jitter: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            activity_interval: Duration::from_secs(5 * 60),
            refresh_interval: Duration::from_secs(25 * 60),
            initial_jitter: Duration::from_secs(2),
        }
    }
}

impl HeartbeatConfig {
    /// Shortest interval accepted for either timer.
    pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

    /// Raises any interval below [`Self::MIN_INTERVAL`] to the minimum.
    ///
    /// Called automatically by [`ActivityHeartbeat::spawn`](crate::ActivityHeartbeat::spawn).
    pub fn validated(mut self) -> Self {
        if self.activity_interval < Self::MIN_INTERVAL {
            warn!(
                interval = ?self.activity_interval,
                "activity_interval below minimum, clamping"
            );
            self.activity_interval = Self::MIN_INTERVAL;
        }
        if self.refresh_interval < Self::MIN_INTERVAL {
            warn!(
                interval = ?self.refresh_interval,
                "refresh_interval below minimum, clamping"
            );
            self.refresh_interval = Self::MIN_INTERVAL;
        }
        self
    }
}
