//! Bounded exponential backoff for driver calls
//!
//! Item info queries, in-memory transfers and disk-backed transfers all share
//! one policy: retry only while the driver reports a transient condition,
//! sleep `base_delay * 2^attempt` between attempts, and give up after
//! `max_attempts`.

use crate::device::traits::{DriverError, DriverResult};
use log::{debug, warn};
use std::thread;
use std::time::Duration;

/// Retry policy for transient driver failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            base_delay: Duration::from_millis(75),
        }
    }
}

/// Why a retried operation gave up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryExhausted {
    /// Last error the driver reported
    pub last_error: DriverError,
    /// Attempts made
    pub attempts: u32,
}

impl RetryPolicy {
    /// Create a policy
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay to wait after the zero-based `attempt` failed
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(16))
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. `op` receives the zero-based attempt number.
    pub fn run<T, F>(&self, label: &str, op: F) -> Result<T, RetryExhausted>
    where
        F: FnMut(u32) -> DriverResult<T>,
    {
        self.run_when(label, op, DriverError::is_retryable)
    }

    /// Like [`run`](Self::run) with a caller-supplied retryable predicate
    pub fn run_when<T, F, P>(&self, label: &str, mut op: F, retryable: P) -> Result<T, RetryExhausted>
    where
        F: FnMut(u32) -> DriverResult<T>,
        P: Fn(&DriverError) -> bool,
    {
        let mut attempt = 0;
        loop {
            match op(attempt) {
                Ok(value) => {
                    if attempt > 0 {
                        debug!("{} succeeded on attempt {}", label, attempt + 1);
                    }
                    return Ok(value);
                }
                Err(e) => {
                    let attempts = attempt + 1;
                    if !retryable(&e) {
                        return Err(RetryExhausted {
                            last_error: e,
                            attempts,
                        });
                    }
                    if attempts >= self.max_attempts {
                        warn!("{} still failing after {} attempts: {}", label, attempts, e);
                        return Err(RetryExhausted {
                            last_error: e,
                            attempts,
                        });
                    }
                    let delay = self.delay_for(attempt);
                    debug!(
                        "{} attempt {}/{} failed ({}), retrying in {:?}",
                        label, attempts, self.max_attempts, e, delay
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}
