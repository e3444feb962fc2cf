//! 弹性模块：并发限制、重试退避、熔断器与限流器。
//!
//! # Resilience Primitives Module
//!
//! Building blocks the queue composes around every upstream attempt.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`ConcurrencyLimiter`] | Semaphore capping simultaneous upstream calls |
//! | [`RetryPolicy`] | Exponential backoff that skips fatal errors |
//! | [`circuit_breaker`] | Fails fast after consecutive upstream failures (opt-in) |
//! | [`rate_limiter`] | Token bucket smoothing attempt rate (opt-in) |
//!
//! ## Attempt order
//!
//! For every attempt the queue:
//!
//! 1. asks the breaker, failing fast with `CircuitOpen` while it is open;
//! 2. takes a rate-limiter token, dropping any held limiter token before it
//!    has to wait for one;
//! 3. holds a limiter token: the first attempt reuses the one taken at
//!    admission, later attempts acquire a fresh one;
//! 4. calls the upstream under the attempt timeout.
//!
//! The limiter token is dropped before any backoff sleep.
//!
//! ```rust
//! use ai_lib_dispatch::resilience::{ConcurrencyLimiter, RetryPolicy};
//! use std::time::Duration;
//!
//! # async fn demo() -> ai_lib_dispatch::Result<()> {
//! let limiter = ConcurrencyLimiter::new(5);
//! let policy = RetryPolicy::new(3, Duration::from_millis(200));
//! let value = policy
//!     .run(|_attempt| {
//!         let limiter = limiter.clone();
//!         async move { limiter.run(|| async { Ok(42) }).await }
//!     })
//!     .await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
mod limiter;
pub mod rate_limiter;
mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState};
pub use limiter::{ConcurrencyLimiter, InflightSnapshot, LimiterToken};
pub use rate_limiter::{RateLimiter, RateLimiterConfig, RateLimiterSnapshot};
pub use retry::{RetryAttempt, RetryPolicy};
