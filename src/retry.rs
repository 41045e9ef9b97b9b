//! Bounded exponential backoff.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How many times to attempt an operation and how long to wait in between.
///
/// After failed attempt `n` (1-based) the caller sleeps
/// `base_delay * 2^(n-1)`, capped at `max_delay`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Values below 1 act as 1.
    ///
    /// Default: 10.
    pub max_attempts: u32,

    /// Delay after the first failed attempt.
    ///
    /// Default: 10 milliseconds.
    #[serde(with = "crate::config::millis")]
    pub base_delay: Duration,

    /// Upper bound on any single delay.
    ///
    /// Default: 1 second.
    #[serde(with = "crate::config::millis")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// A policy that tries exactly once.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// The delay to sleep after failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Why [`with_backoff`] gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error.
    Exhausted { attempts: u32, last: E },
    /// An attempt failed with an error that must not be retried.
    Fatal(E),
}

/// Run `op` until it succeeds, fails fatally, or the policy runs out.
///
/// `op` receives the 1-based attempt number. Between attempts the task
/// sleeps on `tokio::time::sleep`, so dropping the future cancels cleanly.
pub async fn with_backoff<T, E, F>(
    policy: &RetryPolicy,
    is_retryable: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: fmt::Display,
    F: FnMut(u32) -> Result<T, E>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(e) if !is_retryable(&e) => return Err(RetryError::Fatal(e)),
            Err(e) if attempt >= max_attempts => {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: e,
                });
            }
            Err(e) => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum Failure {
        Busy,
        Broken,
    }

    impl fmt::Display for Failure {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{self:?}")
        }
    }

    fn retryable(e: &Failure) -> bool {
        *e == Failure::Busy
    }

    #[test]
    fn delays_double_up_to_cap() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(10));
        assert_eq!(policy.delay_for(2), Duration::from_millis(20));
        assert_eq!(policy.delay_for(3), Duration::from_millis(40));
        assert_eq!(policy.delay_for(4), Duration::from_millis(50));
        assert_eq!(policy.delay_for(60), Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let mut calls = 0;
        let result = with_backoff(&RetryPolicy::default(), retryable, |attempt| {
            calls += 1;
            if attempt < 3 { Err(Failure::Busy) } else { Ok(attempt) }
        })
        .await;
        assert_eq!(result.ok(), Some(3));
        assert_eq!(calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: 4,
            ..RetryPolicy::default()
        };
        let mut calls = 0;
        let result: Result<(), _> = with_backoff(&policy, retryable, |_| {
            calls += 1;
            Err(Failure::Busy)
        })
        .await;
        assert!(matches!(
            result,
            Err(RetryError::Exhausted { attempts: 4, last: Failure::Busy })
        ));
        assert_eq!(calls, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_errors_stop_immediately() {
        let mut calls = 0;
        let result: Result<(), _> = with_backoff(&RetryPolicy::default(), retryable, |_| {
            calls += 1;
            Err(Failure::Broken)
        })
        .await;
        assert!(matches!(result, Err(RetryError::Fatal(Failure::Broken))));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn zero_attempts_still_tries_once() {
        let policy = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        let result = with_backoff(&policy, retryable, |_| Ok::<_, Failure>(7)).await;
        assert_eq!(result.ok(), Some(7));
    }
}
