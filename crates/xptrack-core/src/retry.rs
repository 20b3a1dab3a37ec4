//! Bounded retry with exponential backoff.
//!
//! Every retried call site (page fetches, per-subject writes, commits) goes
//! through a [`RetryPolicy`] so attempt caps and delays are configured in one
//! place. Attempt numbers are 1-based; after the n-th failed attempt the
//! policy sleeps `base_delay * 2^n` before trying again, and never sleeps
//! after the final attempt.

use std::fmt;
use std::thread;
use std::time::Duration;

use tracing::{error, warn};

/// Default attempt cap used by the collector.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Upper bound on a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Attempt cap and backoff shape for a retried operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

/// The operation failed on every allowed attempt (or hit a non-retryable error).
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last: E,
}

impl<E: fmt::Display> fmt::Display for RetryExhausted<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gave up after {} attempt(s): {}", self.attempts, self.last)
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryExhausted<E> {}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, Duration::from_secs(1))
    }
}

impl RetryPolicy {
    /// A policy with `max_attempts` tries (at least one) and exponential backoff
    /// starting from `base_delay`.
    #[must_use]
    pub const fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: if max_attempts == 0 { 1 } else { max_attempts },
            base_delay,
        }
    }

    /// Same attempt cap, no sleeping between attempts.
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Sleep applied after the given (1-based) failed attempt.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1_u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(MAX_BACKOFF, |delay| delay.min(MAX_BACKOFF))
    }

    /// Run `op` until it succeeds or the attempt cap is reached.
    ///
    /// # Errors
    ///
    /// Returns the last error wrapped in [`RetryExhausted`].
    pub fn run<T, E, F>(&self, label: &str, op: F) -> Result<T, RetryExhausted<E>>
    where
        E: fmt::Display,
        F: FnMut(u32) -> Result<T, E>,
    {
        self.run_if(label, op, |_| true)
    }

    /// Like [`RetryPolicy::run`], but stops immediately when `retryable`
    /// rejects an error.
    ///
    /// # Errors
    ///
    /// Returns the last error wrapped in [`RetryExhausted`].
    pub fn run_if<T, E, F, P>(
        &self,
        label: &str,
        mut op: F,
        retryable: P,
    ) -> Result<T, RetryExhausted<E>>
    where
        E: fmt::Display,
        F: FnMut(u32) -> Result<T, E>,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt >= self.max_attempts || !retryable(&err) {
                        error!(label, attempt, error = %err, "giving up");
                        return Err(RetryExhausted {
                            attempts: attempt,
                            last: err,
                        });
                    }
                    warn!(label, attempt, error = %err, "attempt failed");
                    let delay = self.delay_after(attempt);
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_per_attempt() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1));
        assert_eq!(policy.delay_after(1), Duration::from_secs(2));
        assert_eq!(policy.delay_after(2), Duration::from_secs(4));
        assert_eq!(policy.delay_after(4), Duration::from_secs(16));
        assert_eq!(policy.delay_after(40), MAX_BACKOFF);
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        let policy = RetryPolicy::immediate(0);
        assert_eq!(policy.max_attempts(), 1);
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let policy = RetryPolicy::immediate(3);
        let result: Result<u32, RetryExhausted<String>> = policy.run("test", |attempt| {
            if attempt < 3 {
                Err(format!("boom {attempt}"))
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn exhausts_at_attempt_cap() {
        let policy = RetryPolicy::immediate(4);
        let mut calls = 0;
        let err = policy
            .run("test", |_| -> Result<(), &str> {
                calls += 1;
                Err("nope")
            })
            .unwrap_err();
        assert_eq!(calls, 4);
        assert_eq!(err.attempts, 4);
        assert_eq!(err.last, "nope");
    }

    #[test]
    fn non_retryable_error_stops_early() {
        let policy = RetryPolicy::immediate(5);
        let mut calls = 0;
        let err = policy
            .run_if(
                "test",
                |_| -> Result<(), &str> {
                    calls += 1;
                    Err("permanent")
                },
                |e| *e != "permanent",
            )
            .unwrap_err();
        assert_eq!(calls, 1);
        assert_eq!(err.attempts, 1);
    }
}
