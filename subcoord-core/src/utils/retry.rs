//! Bounded exponential backoff.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// How often, and how patiently, to retry an operation.
///
/// The delay before attempt `n + 1` is `base_delay * 2^n`, capped at
/// `max_delay`. With `jitter` set, each delay is drawn uniformly from
/// `[delay / 2, delay]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

/// Outcome of [`RetryPolicy::run`] when the operation never succeeded.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error; carries the last one.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    /// The operation returned an error that must not be retried.
    #[error("{0}")]
    Aborted(E),
}

/// Whether a failed attempt should be retried.
#[derive(Debug)]
pub enum Attempt<E> {
    Retry(E),
    Abort(E),
}

impl RetryPolicy {
    /// Optimistic commit retries inside the transition engine.
    pub const fn commit() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(500),
            jitter: true,
        }
    }

    /// Re-delivery of events whose commit kept failing.
    pub const fn intake() -> Self {
        Self {
            max_attempts: 6,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: false,
        }
    }

    /// A policy that tries exactly once.
    pub const fn once() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Delay to wait after the `attempt`-th failure (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);
        if self.jitter && !delay.is_zero() {
            let half = delay / 2;
            let spread = rand::rng().random_range(0..=half.as_micros() as u64);
            half + Duration::from_micros(spread)
        } else {
            delay
        }
    }

    /// Whether another attempt is allowed after `attempts` have been made.
    pub fn allows(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Run `op` until it succeeds, aborts, or the attempts are used up.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, Attempt<E>>>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(Attempt::Abort(e)) => return Err(RetryError::Aborted(e)),
                Err(Attempt::Retry(e)) => {
                    attempt += 1;
                    if !self.allows(attempt) {
                        return Err(RetryError::Exhausted {
                            attempts: attempt,
                            last: e,
                        });
                    }
                    tokio::time::sleep(self.delay_for(attempt - 1)).await;
                }
            }
        }
    }
}
