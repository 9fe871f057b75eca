//! Retry and backoff policy shared by the key ring, the session protocol,
//! the write path and the polling loop

use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::error::Result;

/// Ceiling for [`RetryPolicy::delay_for`] unless set otherwise
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(2);

/// How often to retry a transport failure and how long to wait in between
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Upper bound for a single blocking attempt (used for card detection)
    pub attempt_timeout: Duration,
    /// Base delay between attempts
    pub backoff: Duration,
    /// Longest delay, however many failures came before
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout: Duration::from_millis(100),
            backoff: Duration::from_millis(50),
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, attempt_timeout: Duration, backoff: Duration) -> Self {
        Self {
            max_attempts,
            attempt_timeout,
            backoff,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }

    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    /// Single attempt, no waiting
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            attempt_timeout: Duration::from_millis(100),
            backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay after `consecutive_failures` failures in a row
    ///
    /// Grows linearly, `backoff * (1 + failures / 2)`, up to `max_backoff`.
    pub fn delay_for(&self, consecutive_failures: u32) -> Duration {
        let grown = self.backoff.saturating_mul(consecutive_failures) / 2;
        self.backoff.saturating_add(grown).min(self.max_backoff)
    }

    /// Run `op`, retrying transport errors until the attempts run out
    pub fn run<T, F>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if attempt < attempts => {
                    debug!(operation, attempt, error = %err, "Transport error, retrying");
                    thread::sleep(self.delay_for(attempt));
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
