use crate::Result;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterSnapshot {
    pub rps: f64,
    pub burst: f64,
    pub tokens: f64,
    /// Estimated wait time until a token is available (ms), if currently empty.
    pub estimated_wait_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Tokens per second. Zero disables limiting.
    pub rps: f64,
    /// Maximum burst size (tokens).
    pub burst: f64,
}

impl RateLimiterConfig {
    pub fn new() -> Self {
        Self {
            rps: 10.0,
            burst: 10.0,
        }
    }

    pub fn from_rps(rps: f64) -> Option<Self> {
        if !rps.is_finite() || rps < 0.0 {
            return None;
        }
        Some(Self {
            rps,
            burst: rps.max(1.0),
        })
    }

    /// `calls` per `period`, e.g. 60 per minute. The burst is one period's worth.
    pub fn per_period(calls: u32, period: Duration) -> Option<Self> {
        if calls == 0 || period.is_zero() {
            return None;
        }
        Some(Self {
            rps: calls as f64 / period.as_secs_f64(),
            burst: calls as f64,
        })
    }

    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.burst = tokens as f64;
        self
    }

    pub fn with_refill_rate(mut self, rate: f64) -> Self {
        self.rps = rate;
        self
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct State {
    tokens: f64,
    last: Instant,
}

/// Token-bucket limiter applied before each upstream attempt (opt-in).
///
/// Waiters re-check the bucket after sleeping, so fairness between tasks is
/// best-effort.
pub struct RateLimiter {
    cfg: RateLimiterConfig,
    state: Mutex<State>,
}

impl RateLimiter {
    pub fn new(cfg: RateLimiterConfig) -> Self {
        let state = Mutex::new(State {
            tokens: cfg.burst,
            last: Instant::now(),
        });
        Self { cfg, state }
    }

    fn refill_locked(cfg: &RateLimiterConfig, st: &mut State) {
        let now = Instant::now();
        let elapsed = now.duration_since(st.last).as_secs_f64();
        if elapsed > 0.0 {
            st.tokens = (st.tokens + elapsed * cfg.rps).min(cfg.burst);
            st.last = now;
        }
    }

    /// Acquire one token (may sleep).
    pub async fn acquire(&self) -> Result<()> {
        let cfg = &self.cfg;
        if cfg.rps <= 0.0 {
            return Ok(());
        }
        loop {
            let wait = {
                let mut st = self.state.lock().await;
                Self::refill_locked(cfg, &mut st);
                if st.tokens >= 1.0 {
                    st.tokens -= 1.0;
                    return Ok(());
                }
                Duration::from_secs_f64((1.0 - st.tokens) / cfg.rps)
            };
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }

    /// Take a token without waiting.
    pub async fn try_acquire(&self) -> bool {
        let cfg = &self.cfg;
        if cfg.rps <= 0.0 {
            return true;
        }
        let mut st = self.state.lock().await;
        Self::refill_locked(cfg, &mut st);
        if st.tokens >= 1.0 {
            st.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    pub async fn snapshot(&self) -> RateLimiterSnapshot {
        let cfg = &self.cfg;
        let mut st = self.state.lock().await;
        let mut estimated_wait_ms = None;
        if cfg.rps > 0.0 {
            Self::refill_locked(cfg, &mut st);
            if st.tokens < 1.0 {
                estimated_wait_ms = Some(((1.0 - st.tokens) / cfg.rps * 1000.0) as u64);
            }
        }
        RateLimiterSnapshot {
            rps: cfg.rps,
            burst: cfg.burst,
            tokens: st.tokens,
            estimated_wait_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_from_rps() {
        let config = RateLimiterConfig::from_rps(10.0).unwrap();
        assert_eq!(config.rps, 10.0);
        assert_eq!(config.burst, 10.0);

        // burst should be at least 1.0
        assert_eq!(RateLimiterConfig::from_rps(0.5).unwrap().burst, 1.0);

        assert!(RateLimiterConfig::from_rps(-1.0).is_none());
        assert!(RateLimiterConfig::from_rps(f64::NAN).is_none());
        assert!(RateLimiterConfig::from_rps(f64::INFINITY).is_none());
    }

    #[test]
    fn config_per_period() {
        let config = RateLimiterConfig::per_period(60, Duration::from_secs(60)).unwrap();
        assert_eq!(config.rps, 1.0);
        assert_eq!(config.burst, 60.0);
        assert!(RateLimiterConfig::per_period(0, Duration::from_secs(1)).is_none());
    }

    #[tokio::test]
    async fn try_acquire_drains_burst() {
        let limiter = RateLimiter::new(
            RateLimiterConfig::new()
                .with_max_tokens(3)
                .with_refill_rate(1.0),
        );
        assert!(limiter.try_acquire().await);
        assert!(limiter.try_acquire().await);
        assert!(limiter.try_acquire().await);
        assert!(!limiter.try_acquire().await);
        assert!(limiter.snapshot().await.estimated_wait_ms.is_some());
    }

    #[tokio::test]
    async fn zero_rps_is_unlimited() {
        let limiter = RateLimiter::new(RateLimiterConfig::from_rps(0.0).unwrap());
        for _ in 0..100 {
            assert!(limiter.acquire().await.is_ok());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_waits_for_refill() {
        // 100 tokens/sec = 1 token/10ms
        let limiter = RateLimiter::new(
            RateLimiterConfig::new()
                .with_max_tokens(2)
                .with_refill_rate(100.0),
        );
        let start = Instant::now();
        for _ in 0..4 {
            limiter.acquire().await.unwrap();
        }
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(20), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(30), "elapsed {elapsed:?}");
    }
}
