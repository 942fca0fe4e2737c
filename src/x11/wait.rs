//! Exponential backoff for polling waits.

use std::time::Duration;

/// First pause between polls.
pub const INITIAL_DELAY: Duration = Duration::from_millis(1);

/// Longest pause between polls.
pub const MAX_DELAY: Duration = Duration::from_millis(500);

/// Doubling delay sequence, capped at [`MAX_DELAY`].
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
}

impl Backoff {
    pub fn new() -> Self {
        Self {
            next: INITIAL_DELAY,
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next;
        self.next = (current * 2).min(MAX_DELAY);
        Some(current)
    }
}
