//! Monotonic deadline timer
//!
//! Used to bound every status-poll loop in this crate. Observes time
//! only; it never sleeps.

use std::time::{Duration, Instant};

/// A deadline computed at construction and polled for expiry.
#[derive(Debug, Clone, Copy)]
pub struct Timeout {
    deadline: Instant,
}

impl Timeout {
    /// Start a timer that expires `duration` from now.
    pub fn new(duration: Duration) -> Self {
        Self {
            deadline: Instant::now() + duration,
        }
    }

    /// Has the deadline passed?
    pub fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Time left before expiry, saturating at zero.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}
