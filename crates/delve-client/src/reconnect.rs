//! Fixed-delay reconnection schedule.
//!
//! After the link drops, the next attempt is due `delay` later. Every failed
//! attempt schedules another one at the same delay; there is no backoff and
//! no attempt cap, so a dead server is retried until the client disconnects
//! deliberately.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct ReconnectSchedule {
    delay: Duration,
    retry_at: Option<Instant>,
    attempts: u32,
}

impl ReconnectSchedule {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            retry_at: None,
            attempts: 0,
        }
    }

    /// Arrange an attempt `delay` after `now`. An attempt that is already
    /// pending keeps its original deadline.
    pub fn schedule(&mut self, now: Instant) {
        if self.retry_at.is_none() {
            self.retry_at = Some(now + self.delay);
        }
    }

    /// If an attempt is due at `now`, consume it and return `true`.
    pub fn due(&mut self, now: Instant) -> bool {
        match self.retry_at {
            Some(at) if now >= at => {
                self.retry_at = None;
                self.attempts += 1;
                true
            }
            _ => false,
        }
    }

    /// Drop any pending attempt and reset the counter. Called after a
    /// successful connect and on deliberate disconnect.
    pub fn cancel(&mut self) {
        self.retry_at = None;
        self.attempts = 0;
    }

    pub fn is_pending(&self) -> bool {
        self.retry_at.is_some()
    }

    /// Attempts fired since the last [`ReconnectSchedule::cancel`].
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}
