use crate::{Error, Result};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
    pub consecutive_failures: u32,
    /// Remaining open time in ms, if currently open.
    pub open_remaining_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Defaults overridden by `AI_LIB_BREAKER_FAILURE_THRESHOLD` and
    /// `AI_LIB_BREAKER_COOLDOWN_SECS`.
    pub fn from_env() -> Self {
        let threshold = std::env::var("AI_LIB_BREAKER_FAILURE_THRESHOLD")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(5);
        let cooldown_secs = std::env::var("AI_LIB_BREAKER_COOLDOWN_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(30);
        Self {
            failure_threshold: threshold.max(1),
            cooldown: Duration::from_secs(cooldown_secs.max(1)),
        }
    }
}

#[derive(Debug)]
struct State {
    consecutive_failures: u32,
    open_until: Option<Instant>,
    half_open: bool,
}

/// Circuit breaker over upstream attempts.
///
/// - Counts consecutive retryable failures
/// - Opens for `cooldown` once the threshold is reached; attempts fail fast
///   with [`Error::CircuitOpen`] meanwhile
/// - After the cooldown exactly one attempt is let through as a half-open
///   probe; the rest keep failing fast until it reports back. Success closes
///   the circuit, failure reopens it immediately
pub struct CircuitBreaker {
    cfg: CircuitBreakerConfig,
    state: Mutex<State>,
}

impl CircuitBreaker {
    pub fn new(cfg: CircuitBreakerConfig) -> Self {
        Self {
            cfg,
            state: Mutex::new(State {
                consecutive_failures: 0,
                open_until: None,
                half_open: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn allow(&self) -> Result<()> {
        let mut st = self.lock();
        if let Some(until) = st.open_until {
            let now = Instant::now();
            if now < until {
                return Err(Error::CircuitOpen {
                    remaining_ms: (until - now).as_millis() as u64,
                });
            }
            // one trial attempt per cooldown; one that never reports back
            // frees the next one after another cooldown
            st.open_until = Some(now + self.cfg.cooldown);
            st.half_open = true;
            info!("circuit breaker half-open, probing upstream");
        }
        Ok(())
    }

    pub fn on_success(&self) {
        let mut st = self.lock();
        if st.half_open {
            info!("circuit breaker closed, upstream recovered");
        }
        st.consecutive_failures = 0;
        st.open_until = None;
        st.half_open = false;
    }

    pub fn on_failure(&self) {
        let mut st = self.lock();
        st.consecutive_failures = st.consecutive_failures.saturating_add(1);
        if st.half_open || st.consecutive_failures >= self.cfg.failure_threshold {
            st.open_until = Some(Instant::now() + self.cfg.cooldown);
            st.half_open = false;
            warn!(
                failures = st.consecutive_failures,
                cooldown_ms = self.cfg.cooldown.as_millis() as u64,
                "circuit breaker open"
            );
        }
    }

    pub fn state(&self) -> CircuitState {
        let st = self.lock();
        match st.open_until {
            _ if st.half_open => CircuitState::HalfOpen,
            Some(until) if Instant::now() < until => CircuitState::Open,
            Some(_) => CircuitState::HalfOpen,
            None => CircuitState::Closed,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let state = self.state();
        let st = self.lock();
        let now = Instant::now();
        let open_remaining_ms = st
            .open_until
            .filter(|until| *until > now)
            .map(|until| (until - now).as_millis() as u64);
        CircuitBreakerSnapshot {
            state,
            failure_threshold: self.cfg.failure_threshold,
            cooldown_ms: self.cfg.cooldown.as_millis() as u64,
            consecutive_failures: st.consecutive_failures,
            open_remaining_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder() {
        let config = CircuitBreakerConfig::new()
            .with_failure_threshold(3)
            .with_cooldown(Duration::from_secs(10));
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.cooldown, Duration::from_secs(10));
        assert_eq!(CircuitBreakerConfig::new().with_failure_threshold(0).failure_threshold, 1);
    }

    #[test]
    fn success_resets_failures() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::new().with_failure_threshold(5));
        cb.on_failure();
        cb.on_failure();
        assert_eq!(cb.snapshot().consecutive_failures, 2);
        cb.on_success();
        assert_eq!(cb.snapshot().consecutive_failures, 0);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn opens_at_threshold_and_half_opens_after_cooldown() {
        let cb = CircuitBreaker::new(
            CircuitBreakerConfig::new()
                .with_failure_threshold(3)
                .with_cooldown(Duration::from_millis(100)),
        );
        cb.on_failure();
        cb.on_failure();
        assert!(cb.allow().is_ok());
        cb.on_failure();
        assert!(matches!(cb.allow(), Err(Error::CircuitOpen { .. })));
        assert!(cb.is_open());

        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.allow().is_ok());

        // probe fails: straight back to open
        cb.on_failure();
        assert!(cb.allow().is_err());

        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(cb.allow().is_ok());
        cb.on_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_a_single_trial_attempt() {
        let cb = CircuitBreaker::new(
            CircuitBreakerConfig::new()
                .with_failure_threshold(1)
                .with_cooldown(Duration::from_millis(100)),
        );
        cb.on_failure();
        tokio::time::advance(Duration::from_millis(150)).await;

        assert!(cb.allow().is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(matches!(cb.allow(), Err(Error::CircuitOpen { .. })));
        assert!(matches!(cb.allow(), Err(Error::CircuitOpen { .. })));
        assert!(!cb.is_open());

        cb.on_success();
        assert!(cb.allow().is_ok());
        assert!(cb.allow().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn unreported_trial_frees_the_next_after_cooldown() {
        let cb = CircuitBreaker::new(
            CircuitBreakerConfig::new()
                .with_failure_threshold(1)
                .with_cooldown(Duration::from_millis(100)),
        );
        cb.on_failure();
        tokio::time::advance(Duration::from_millis(150)).await;
        // trial granted, then dropped without reporting
        assert!(cb.allow().is_ok());
        assert!(cb.allow().is_err());

        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(cb.allow().is_ok());
        assert!(cb.allow().is_err());
    }

    #[test]
    fn saturating_failures() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::new().with_failure_threshold(u32::MAX));
        for _ in 0..1000 {
            cb.on_failure();
        }
        assert_eq!(cb.snapshot().consecutive_failures, 1000);
    }
}
