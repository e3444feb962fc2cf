use crate::{Error, ErrorContext, Result};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InflightSnapshot {
    pub max: usize,
    pub available: usize,
    pub in_use: usize,
}

/// A held unit of upstream capacity. Dropping it returns the capacity.
#[derive(Debug)]
pub struct LimiterToken {
    _permit: OwnedSemaphorePermit,
}

/// Caps simultaneously executing upstream calls.
///
/// Backed by a tokio semaphore, whose waiters are served FIFO. Tokens are
/// RAII permits, so capacity comes back on success, error, panic unwind and
/// future cancellation alike.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    max: usize,
}

impl ConcurrencyLimiter {
    pub fn new(max_concurrency: usize) -> Self {
        let max = max_concurrency.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max)),
            max,
        }
    }

    /// Wait for a token.
    pub async fn acquire(&self) -> Result<LimiterToken> {
        let permit = self.semaphore.clone().acquire_owned().await.map_err(|_| {
            Error::runtime_with_context(
                "Concurrency limiter closed",
                ErrorContext::new().with_source("concurrency_limiter"),
            )
        })?;
        Ok(LimiterToken { _permit: permit })
    }

    /// Take a token only if one is free right now.
    pub fn try_acquire(&self) -> Option<LimiterToken> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| LimiterToken { _permit: permit })
    }

    /// Run `f` while holding a token.
    pub async fn run<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _token = self.acquire().await?;
        f().await
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn in_use(&self) -> usize {
        self.max.saturating_sub(self.available())
    }

    pub fn snapshot(&self) -> InflightSnapshot {
        let available = self.available();
        InflightSnapshot {
            max: self.max,
            available,
            in_use: self.max.saturating_sub(available),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn tokens_are_bounded() {
        let limiter = ConcurrencyLimiter::new(2);
        let a = limiter.try_acquire().unwrap();
        let _b = limiter.try_acquire().unwrap();
        assert!(limiter.try_acquire().is_none());
        assert_eq!(limiter.snapshot(), InflightSnapshot { max: 2, available: 0, in_use: 2 });
        drop(a);
        assert!(limiter.try_acquire().is_some());
    }

    #[tokio::test]
    async fn token_released_when_fn_fails() {
        let limiter = ConcurrencyLimiter::new(1);
        let result: Result<()> = limiter
            .run(|| async { Err(Error::from_status(500, "boom")) })
            .await;
        assert!(result.is_err());
        assert_eq!(limiter.available(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn token_released_when_future_is_dropped() {
        let limiter = ConcurrencyLimiter::new(1);
        let slow = limiter.run(|| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });
        let timed_out = tokio::time::timeout(Duration::from_millis(10), slow).await;
        assert!(timed_out.is_err());
        assert_eq!(limiter.available(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_runs_never_exceed_max() {
        let limiter = ConcurrencyLimiter::new(3);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks = (0..10).map(|_| {
            let limiter = limiter.clone();
            let current = current.clone();
            let peak = peak.clone();
            tokio::spawn(async move {
                limiter
                    .run(|| async {
                        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        current.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
            })
        });
        for result in futures::future::join_all(tasks).await {
            result.unwrap().unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(limiter.available(), 3);
    }

    #[test]
    fn zero_is_clamped_to_one() {
        assert_eq!(ConcurrencyLimiter::new(0).max(), 1);
    }
}
