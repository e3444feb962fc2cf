use super::core::{ClientInner, DispatchClient};
use super::stats::{ClientCounters, LatencyWindow};
use super::upstream::Upstream;
use crate::batch::{BatchAggregator, BatchConfig};
use crate::cache::{CacheKeyGenerator, CacheStore, ResponseCache};
use crate::config::ClientConfig;
use crate::events::EventBus;
use crate::queue::{QueueConfig, QueueHooks, RequestQueue};
use crate::resilience::{
    CircuitBreaker, CircuitBreakerConfig, ConcurrencyLimiter, RateLimiter, RateLimiterConfig,
    RetryPolicy,
};
use crate::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Builder for [`DispatchClient`].
///
/// Keep this surface area small: the typed [`ClientConfig`] carries the
/// numbers, the builder wires optional collaborators.
pub struct DispatchClientBuilder {
    upstream: Arc<dyn Upstream>,
    config: ClientConfig,
    store: Option<Arc<dyn CacheStore>>,
    breaker: Option<Arc<CircuitBreaker>>,
    rate_limiter: Option<Arc<RateLimiter>>,
}

impl DispatchClientBuilder {
    pub fn new(upstream: impl Upstream + 'static) -> Self {
        Self::from_arc(Arc::new(upstream))
    }

    pub fn from_arc(upstream: Arc<dyn Upstream>) -> Self {
        Self {
            upstream,
            config: ClientConfig::default(),
            store: None,
            breaker: None,
            rate_limiter: None,
        }
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Persist cache entries through `store` in addition to memory.
    pub fn cache_store(mut self, store: impl CacheStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    pub fn circuit_breaker(mut self, cfg: CircuitBreakerConfig) -> Self {
        self.breaker = Some(Arc::new(CircuitBreaker::new(cfg)));
        self
    }

    /// Enable a circuit breaker with env-driven defaults:
    /// - `AI_LIB_BREAKER_FAILURE_THRESHOLD` (default 5)
    /// - `AI_LIB_BREAKER_COOLDOWN_SECS` (default 30)
    pub fn circuit_breaker_default(self) -> Self {
        self.circuit_breaker(CircuitBreakerConfig::from_env())
    }

    pub fn rate_limiter(mut self, cfg: RateLimiterConfig) -> Self {
        self.rate_limiter = Some(Arc::new(RateLimiter::new(cfg)));
        self
    }

    /// Enable a token-bucket rate limiter. Invalid rates are ignored.
    ///
    /// Without this, `AI_LIB_RPS` or `AI_LIB_RPM` in the environment enable
    /// one at build time.
    pub fn rate_limit_rps(self, rps: f64) -> Self {
        match RateLimiterConfig::from_rps(rps) {
            Some(cfg) => self.rate_limiter(cfg),
            None => self,
        }
    }

    /// Validate the configuration and build the client.
    ///
    /// Building spawns nothing, but calls on the client must run inside a
    /// tokio runtime.
    pub fn build(self) -> Result<DispatchClient> {
        let config = self.config;
        config.validate()?;

        let env_rps = std::env::var("AI_LIB_RPS")
            .ok()
            .and_then(|s| s.parse::<f64>().ok());
        let env_rpm = std::env::var("AI_LIB_RPM")
            .ok()
            .and_then(|s| s.parse::<f64>().ok());
        let rate_limiter = self.rate_limiter.or_else(|| {
            env_rps
                .or_else(|| env_rpm.map(|rpm| rpm / 60.0))
                .and_then(RateLimiterConfig::from_rps)
                .map(|cfg| Arc::new(RateLimiter::new(cfg)))
        });

        let events = EventBus::new(config.event_capacity);
        let retry = RetryPolicy::new(config.max_retries, config.base_retry_delay)
            .with_max_delay(config.max_retry_delay);
        let queue = RequestQueue::with_hooks(
            QueueConfig {
                max_queue_depth: config.max_queue_depth,
                attempt_timeout: config.request_timeout,
                retry,
            },
            ConcurrencyLimiter::new(config.max_concurrency),
            QueueHooks {
                circuit_breaker: self.breaker.clone(),
                rate_limiter: rate_limiter.clone(),
                events: events.clone(),
            },
        );
        let aggregator = BatchAggregator::new(
            BatchConfig::new()
                .with_max_batch_size(config.batch_size)
                .with_max_wait_time(config.batch_window),
            queue.clone(),
            events.clone(),
        );

        let mut keys = CacheKeyGenerator::new();
        if let Some(salt) = &config.cache_key_salt {
            keys = keys.with_salt(salt.clone());
        }

        info!(
            upstream = self.upstream.name(),
            max_concurrency = config.max_concurrency,
            max_queue_depth = config.max_queue_depth,
            max_retries = config.max_retries,
            cache_store = self.store.as_ref().map(|s| s.name()),
            circuit_breaker = self.breaker.is_some(),
            rate_limiter = rate_limiter.is_some(),
            "dispatch client ready"
        );

        Ok(DispatchClient {
            inner: Arc::new(ClientInner {
                cache: ResponseCache::new(config.max_cache_entries, config.ttl),
                latencies: LatencyWindow::new(config.latency_window),
                upstream: self.upstream,
                keys,
                store: self.store,
                queue,
                aggregator,
                breaker: self.breaker,
                rate_limiter,
                events,
                inflight: Mutex::new(HashMap::new()),
                counters: ClientCounters::default(),
                config,
            }),
        })
    }
}
