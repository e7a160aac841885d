//! Interval throttle for liveness logs and per-frame warnings

use std::time::{Duration, Instant};

/// Fires at most once per interval
#[derive(Debug, Clone)]
pub struct Throttle {
    interval: Duration,
    last: Instant,
}

impl Throttle {
    /// Create a throttle whose first firing is one interval from now
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Instant::now(),
        }
    }

    /// True if the interval has elapsed since the last firing; restarts the
    /// interval when it fires
    pub fn ready(&mut self) -> bool {
        self.ready_at(Instant::now())
    }

    fn ready_at(&mut self, now: Instant) -> bool {
        if now.duration_since(self.last) > self.interval {
            self.last = now;
            true
        } else {
            false
        }
    }
}
