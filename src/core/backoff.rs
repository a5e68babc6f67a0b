//! Exponential backoff untuk accept error yang transient
//!
//! Pure step function over `(delay, attempts)`, so the arithmetic is
//! testable without a socket.

use std::time::Duration;

/// Delay before the first retry.
pub const INITIAL_DELAY: Duration = Duration::from_millis(10);

/// State backoff: delay saat ini dan jumlah percobaan berturut-turut
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub delay: Duration,
    pub attempts: usize,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

impl Backoff {
    #[inline(always)]
    pub const fn new() -> Self {
        Self {
            delay: INITIAL_DELAY,
            attempts: 0,
        }
    }

    /// Next state: delay doubled, attempts incremented.
    #[inline(always)]
    #[must_use]
    pub fn next(self) -> Self {
        Self {
            delay: self.delay.saturating_mul(2),
            attempts: self.attempts + 1,
        }
    }

    /// True once more than `max_retries` consecutive attempts were made.
    #[inline(always)]
    pub fn exhausted(&self, max_retries: usize) -> bool {
        self.attempts > max_retries
    }
}
