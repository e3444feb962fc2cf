use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Information about a failed attempt that is about to be retried.
#[derive(Debug)]
pub struct RetryAttempt<'a> {
    /// 1-based number of the attempt that just failed.
    pub attempt: u32,
    /// Backoff before the next attempt.
    pub delay: Duration,
    pub error: &'a Error,
}

/// Exponential backoff over a fallible async operation.
///
/// - Fatal errors (see [`Error::is_retryable`]) are returned immediately.
/// - Retryable errors wait `base_delay * 2^n` (n = 0-based failed attempt,
///   capped at `max_delay`) and try again, up to `max_attempts` in total.
/// - Running out of attempts yields [`Error::RetryExhausted`] wrapping the
///   last error.
///
/// The policy holds no limiter token; callers acquire one per attempt so a
/// sleeping retry does not occupy a concurrency slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: Duration::from_secs(30).max(base_delay),
        }
    }

    /// A policy that never retries.
    pub fn single_attempt() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Backoff after the `attempt`-th failure (0-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub async fn run<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_observed(op, |_| {}).await
    }

    /// Like [`run`](Self::run), calling `on_retry` before every backoff sleep.
    ///
    /// `op` receives the 0-based attempt index and must build a fresh future
    /// each time; nothing is carried over from a failed attempt.
    pub async fn run_observed<T, F, Fut, O>(&self, mut op: F, mut on_retry: O) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
        O: FnMut(&RetryAttempt<'_>),
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            let err = match op(attempt).await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(attempts = attempt + 1, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if err.is_fatal() {
                debug!(attempt = attempt + 1, error = %err, "fatal error, not retrying");
                return Err(err);
            }

            if attempt + 1 >= max_attempts {
                warn!(attempts = max_attempts, error = %err, "all attempts failed");
                return Err(Error::RetryExhausted {
                    attempts: max_attempts,
                    last: Box::new(err),
                });
            }

            let delay = self.backoff_delay(attempt);
            warn!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "attempt failed, retrying"
            );
            on_retry(&RetryAttempt {
                attempt: attempt + 1,
                delay,
                error: &err,
            });
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(500));
        assert_eq!(policy.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(400));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(500));
        assert_eq!(policy.backoff_delay(40), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_last_attempt() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        let start = Instant::now();
        let result = policy
            .run(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(Error::from_status(503, "busy"))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 10ms + 20ms of backoff
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(30) && elapsed < Duration::from_millis(35));
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_wraps_last_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(4, Duration::from_millis(1));
        let result: Result<()> = policy
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::Timeout { timeout_ms: 5 }) }
            })
            .await;
        let err = result.unwrap_err();
        assert!(matches!(err, Error::RetryExhausted { attempts: 4, .. }));
        assert!(matches!(err.root(), Error::Timeout { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::from_millis(1));
        let result: Result<()> = policy
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::from_status(401, "bad key")) }
            })
            .await;
        assert!(matches!(result, Err(Error::Upstream { status: Some(401), .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn observer_sees_each_retry() {
        let policy = RetryPolicy::new(3, Duration::from_millis(5));
        let mut seen = Vec::new();
        let _: Result<()> = policy
            .run_observed(
                |_| async { Err(Error::from_status(500, "boom")) },
                |r| seen.push((r.attempt, r.delay)),
            )
            .await;
        assert_eq!(
            seen,
            vec![(1, Duration::from_millis(5)), (2, Duration::from_millis(10))]
        );
    }

    #[tokio::test]
    async fn single_attempt_exhausts_immediately_on_retryable() {
        let result: Result<()> = RetryPolicy::single_attempt()
            .run(|_| async { Err(Error::from_status(502, "bad gateway")) })
            .await;
        assert!(matches!(result, Err(Error::RetryExhausted { attempts: 1, .. })));
    }
}
