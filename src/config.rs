//! 客户端配置：缓存、并发、重试、批处理的类型化配置，支持 YAML 与环境变量覆盖。
//!
//! Typed configuration for [`DispatchClient`](crate::DispatchClient).
//!
//! Durations are (de)serialized as integer milliseconds with an `_ms` suffix:
//!
//! ```yaml
//! ttl_ms: 86400000
//! max_cache_entries: 1000
//! max_concurrency: 5
//! max_queue_depth: 100
//! max_retries: 3
//! base_retry_delay_ms: 1000
//! request_timeout_ms: 30000
//! batch_size: 5
//! batch_window_ms: 2000
//! ```
//!
//! Every field can also be overridden from the environment with the
//! `AI_LIB_DISPATCH_` prefix, e.g. `AI_LIB_DISPATCH_MAX_CONCURRENCY=8`.

use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const ENV_PREFIX: &str = "AI_LIB_DISPATCH_";

/// Client configuration with documented defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Lifetime of a cache entry (default 24h).
    #[serde(rename = "ttl_ms", with = "duration_ms")]
    pub ttl: Duration,
    /// Maximum number of cached responses before LRU eviction (default 1000).
    pub max_cache_entries: usize,
    /// Disable to route every call upstream (default true).
    pub cache_enabled: bool,
    /// Mixed into every cache key; bump it to invalidate persisted entries.
    pub cache_key_salt: Option<String>,
    /// Simultaneous upstream calls (default 5).
    pub max_concurrency: usize,
    /// Admitted-but-waiting requests before `QueueFull` (default 100).
    pub max_queue_depth: usize,
    /// Total attempts per call, including the first one (default 3).
    pub max_retries: u32,
    /// Backoff seed: attempt `n` (0-based) waits `base * 2^n` (default 1s).
    #[serde(rename = "base_retry_delay_ms", with = "duration_ms")]
    pub base_retry_delay: Duration,
    /// Upper bound for a single backoff sleep (default 30s).
    #[serde(rename = "max_retry_delay_ms", with = "duration_ms")]
    pub max_retry_delay: Duration,
    /// Per-attempt deadline (default 30s).
    #[serde(rename = "request_timeout_ms", with = "duration_ms")]
    pub request_timeout: Duration,
    /// Flush a batch once it holds this many calls (default 5).
    pub batch_size: usize,
    /// Flush a batch once its oldest call waited this long (default 2s).
    #[serde(rename = "batch_window_ms", with = "duration_ms")]
    pub batch_window: Duration,
    /// Route single `call`s through the batch aggregator (default false).
    pub batching_enabled: bool,
    /// Share one upstream execution between concurrent identical calls (default true).
    pub coalesce_inflight: bool,
    /// Number of recent latencies averaged for stats (default 100).
    pub latency_window: usize,
    /// Average latency above which health is reported as degraded (default 5s).
    #[serde(rename = "degraded_latency_ms", with = "duration_ms")]
    pub degraded_latency: Duration,
    /// Buffered events per subscriber before it starts lagging (default 256).
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 3600),
            max_cache_entries: 1000,
            cache_enabled: true,
            cache_key_salt: None,
            max_concurrency: 5,
            max_queue_depth: 100,
            max_retries: 3,
            base_retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            batch_size: 5,
            batch_window: Duration::from_secs(2),
            batching_enabled: false,
            coalesce_inflight: true,
            latency_window: 100,
            degraded_latency: Duration::from_secs(5),
            event_capacity: 256,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_max_cache_entries(mut self, n: usize) -> Self {
        self.max_cache_entries = n;
        self
    }

    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n;
        self
    }

    pub fn with_max_queue_depth(mut self, n: usize) -> Self {
        self.max_queue_depth = n;
        self
    }

    pub fn with_max_retries(mut self, attempts: u32) -> Self {
        self.max_retries = attempts;
        self
    }

    pub fn with_base_retry_delay(mut self, delay: Duration) -> Self {
        self.base_retry_delay = delay;
        self
    }

    pub fn with_max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = delay;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_batching(mut self, size: usize, window: Duration) -> Self {
        self.batch_size = size;
        self.batch_window = window;
        self
    }

    pub fn with_batching_enabled(mut self, enabled: bool) -> Self {
        self.batching_enabled = enabled;
        self
    }

    pub fn with_coalesce_inflight(mut self, enabled: bool) -> Self {
        self.coalesce_inflight = enabled;
        self
    }

    pub fn with_degraded_latency(mut self, threshold: Duration) -> Self {
        self.degraded_latency = threshold;
        self
    }

    /// Parse a YAML document; missing fields keep their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let cfg: Self = serde_yaml::from_str(yaml).map_err(|e| {
            Error::configuration_with_context(
                "invalid YAML configuration",
                ErrorContext::new()
                    .with_details(e.to_string())
                    .with_source("config_loader"),
            )
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load a YAML file, then apply environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration_with_context(
                "failed to read configuration file",
                ErrorContext::new()
                    .with_field_path(path.display().to_string())
                    .with_details(e.to_string())
                    .with_source("config_loader"),
            )
        })?;
        Self::from_yaml_str(&raw)?.apply_env()
    }

    /// Defaults overridden by the environment.
    pub fn from_env() -> Result<Self> {
        Self::default().apply_env()
    }

    /// Override fields from `AI_LIB_DISPATCH_*` variables, then validate.
    pub fn apply_env(mut self) -> Result<Self> {
        if let Some(v) = env_parse::<u64>("TTL_MS")? {
            self.ttl = Duration::from_millis(v);
        }
        if let Some(v) = env_parse("MAX_CACHE_ENTRIES")? {
            self.max_cache_entries = v;
        }
        if let Some(v) = env_parse("CACHE_ENABLED")? {
            self.cache_enabled = v;
        }
        if let Some(v) = env_parse::<String>("CACHE_KEY_SALT")? {
            self.cache_key_salt = Some(v);
        }
        if let Some(v) = env_parse("MAX_CONCURRENCY")? {
            self.max_concurrency = v;
        }
        if let Some(v) = env_parse("MAX_QUEUE_DEPTH")? {
            self.max_queue_depth = v;
        }
        if let Some(v) = env_parse("MAX_RETRIES")? {
            self.max_retries = v;
        }
        if let Some(v) = env_parse::<u64>("BASE_RETRY_DELAY_MS")? {
            self.base_retry_delay = Duration::from_millis(v);
        }
        if let Some(v) = env_parse::<u64>("MAX_RETRY_DELAY_MS")? {
            self.max_retry_delay = Duration::from_millis(v);
        }
        if let Some(v) = env_parse::<u64>("REQUEST_TIMEOUT_MS")? {
            self.request_timeout = Duration::from_millis(v);
        }
        if let Some(v) = env_parse("BATCH_SIZE")? {
            self.batch_size = v;
        }
        if let Some(v) = env_parse::<u64>("BATCH_WINDOW_MS")? {
            self.batch_window = Duration::from_millis(v);
        }
        if let Some(v) = env_parse("BATCHING_ENABLED")? {
            self.batching_enabled = v;
        }
        if let Some(v) = env_parse("COALESCE_INFLIGHT")? {
            self.coalesce_inflight = v;
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject values that would leave the client unable to make progress.
    pub fn validate(&self) -> Result<()> {
        fn invalid(field: &str, msg: &str) -> Error {
            Error::configuration_with_context(
                msg,
                ErrorContext::new()
                    .with_field_path(field)
                    .with_source("config_validator"),
            )
        }

        if self.max_concurrency == 0 {
            return Err(invalid("max_concurrency", "must be at least 1"));
        }
        if self.max_cache_entries == 0 {
            return Err(invalid("max_cache_entries", "must be at least 1"));
        }
        if self.max_retries == 0 {
            return Err(invalid("max_retries", "must allow at least one attempt"));
        }
        if self.request_timeout.is_zero() {
            return Err(invalid("request_timeout_ms", "must be greater than zero"));
        }
        if self.batch_size == 0 {
            return Err(invalid("batch_size", "must be at least 1"));
        }
        if self.batch_window.is_zero() {
            return Err(invalid("batch_window_ms", "must be greater than zero"));
        }
        if self.max_retry_delay < self.base_retry_delay {
            return Err(invalid(
                "max_retry_delay_ms",
                "must not be smaller than base_retry_delay_ms",
            ));
        }
        if self.latency_window == 0 {
            return Err(invalid("latency_window", "must be at least 1"));
        }
        if self.event_capacity == 0 {
            return Err(invalid("event_capacity", "must be at least 1"));
        }
        Ok(())
    }

    /// Serialize the effective configuration back to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| {
            Error::configuration_with_context(
                "failed to serialize configuration",
                ErrorContext::new()
                    .with_details(e.to_string())
                    .with_source("config_loader"),
            )
        })
    }
}

fn env_parse<T: FromStr>(suffix: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    let name = format!("{}{}", ENV_PREFIX, suffix);
    match std::env::var(&name) {
        Ok(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
            Error::configuration_with_context(
                format!("cannot parse {}", name),
                ErrorContext::new()
                    .with_field_path(name.clone())
                    .with_details(format!("{:?}: {}", raw, e))
                    .with_source("config_env"),
            )
        }),
        Err(_) => Ok(None),
    }
}

pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
