//! A pausable fixed-interval timer.
//!
//! Designed to sit inside a `tokio::select!` loop next to a command
//! channel. [`IntervalTimer::wait`] is cancel-safe: the deadline only
//! moves after it fires, so dropping a pending `wait` loses nothing.

use std::time::Duration;

use rand::Rng;
use tokio::time::{self, Instant};
use tracing::{debug, trace};

/// Fires every `period` until paused.
pub struct IntervalTimer {
    name: &'static str,
    period: Duration,
    next: Instant,
    paused: bool,
    fired: u64,
}

impl IntervalTimer {
    /// Creates a running timer. The first deadline is `period` plus a
    /// random delay below `max_jitter`.
    pub fn new(name: &'static str, period: Duration, max_jitter: Duration) -> Self {
        let jitter = if max_jitter.is_zero() {
            Duration::ZERO
        } else {
            let ms = u64::try_from(max_jitter.as_millis()).unwrap_or(u64::MAX).max(1);
            Duration::from_millis(rand::rng().random_range(0..ms))
        };
        debug!(timer = name, ?period, ?jitter, "interval timer created");
        Self {
            name,
            period,
            next: Instant::now() + period + jitter,
            paused: false,
            fired: 0,
        }
    }

    /// Waits for the next deadline and returns how many times the timer
    /// has fired, this one included.
    ///
    /// Pends forever while paused; `tokio::select!` keeps serving the
    /// other branches.
    pub async fn wait(&mut self) -> u64 {
        if self.paused {
            std::future::pending::<()>().await;
        }
        time::sleep_until(self.next).await;

        // Schedule from now, not from the missed deadline, so a stall
        // never produces a burst.
        self.next = Instant::now() + self.period;
        self.fired += 1;
        trace!(timer = self.name, fired = self.fired, "interval timer fired");
        self.fired
    }

    /// Stops the timer. Idempotent.
    pub fn pause(&mut self) {
        if !self.paused {
            self.paused = true;
            debug!(timer = self.name, "interval timer paused");
        }
    }

    /// Restarts the timer with a fresh full period. Idempotent.
    pub fn resume(&mut self) {
        if self.paused {
            self.paused = false;
            self.next = Instant::now() + self.period;
            debug!(timer = self.name, "interval timer resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn fired(&self) -> u64 {
        self.fired
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}
