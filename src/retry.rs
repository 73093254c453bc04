//! Exponential backoff for transient failures.
//!
//! [`RetryPolicy::run`] re-invokes an async operation while its error
//! classifies as [`ErrorKind::Transient`](crate::error::ErrorKind). Any other
//! error is returned immediately.
//!
//! # Backoff Strategy
//!
//! ```text
//! delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..=jitter)
//! ```
//!
//! Delays are `tokio::time::sleep`, so a backing-off article never stalls the
//! other aggregations sharing the runtime.

use crate::config::FetchConfig;
use crate::error::Classify;
use rand::{Rng, rng};
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, warn};

/// The error returned once a retried operation gives up.
#[derive(Debug)]
pub struct RetryFailure<E> {
    /// Total number of attempts made, including the first.
    pub attempts: usize,
    /// The error of the final attempt.
    pub last: E,
}

#[derive(Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    max_retries: usize,
    /// Initial delay between retries (doubles with each attempt).
    base_delay: Duration,
    /// Cap on the exponential delay.
    max_delay: Duration,
    jitter_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_retries: usize, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(30),
            jitter_ms: 250,
        }
    }

    pub fn from_config(config: &FetchConfig) -> Self {
        Self::new(config.max_retries, Duration::from_millis(config.base_delay_ms))
            .with_max_delay(Duration::from_millis(config.max_delay_ms))
            .with_jitter_ms(config.jitter_ms)
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter_ms(mut self, jitter_ms: u64) -> Self {
        self.jitter_ms = jitter_ms;
        self
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    /// Backoff before retry number `attempt` (1-based), without jitter.
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let shift = attempt.saturating_sub(1).min(31) as u32;
        self.base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails non-transiently, or retries run out.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, RetryFailure<E>>
    where
        E: Classify + fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    attempt += 1;
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    if !e.is_transient() {
                        return Err(RetryFailure {
                            attempts: attempt,
                            last: e,
                        });
                    }

                    if attempt > self.max_retries {
                        error!(
                            label,
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                            elapsed_ms_total = total_dt.as_millis() as u64,
                            error = %e,
                            "exhausted retries"
                        );
                        return Err(RetryFailure {
                            attempts: attempt,
                            last: e,
                        });
                    }

                    let jitter = if self.jitter_ms > 0 {
                        rng().random_range(0..=self.jitter_ms)
                    } else {
                        0
                    };
                    let delay = self.delay_for(attempt) + Duration::from_millis(jitter);

                    warn!(
                        label,
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                        elapsed_ms_total = total_dt.as_millis() as u64,
                        ?delay,
                        error = %e,
                        "attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use std::cell::Cell;

    fn fast_policy(max_retries: usize) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(1)).with_jitter_ms(0)
    }

    #[test]
    fn delay_doubles_and_caps() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for(40), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let calls = Cell::new(0);
        let result = fast_policy(3)
            .run("test", || {
                calls.set(calls.get() + 1);
                let n = calls.get();
                async move {
                    if n < 3 {
                        Err(FetchError::Timeout(10))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn non_transient_errors_fail_immediately() {
        let calls = Cell::new(0);
        let result: Result<(), _> = fast_policy(5)
            .run("test", || {
                calls.set(calls.get() + 1);
                async { Err(FetchError::Unresolvable("nowhere.invalid".into())) }
            })
            .await;
        let failure = result.unwrap_err();
        assert_eq!(failure.attempts, 1);
        assert_eq!(calls.get(), 1);
        assert!(matches!(failure.last, FetchError::Unresolvable(_)));
    }

    #[tokio::test]
    async fn exhausted_retries_report_attempts() {
        let result: Result<(), _> = fast_policy(2)
            .run("test", || async { Err(FetchError::Status(503)) })
            .await;
        let failure = result.unwrap_err();
        assert_eq!(failure.attempts, 3);
        assert!(matches!(failure.last, FetchError::Status(503)));
    }
}
