use super::health::{self, HealthReport};
use super::stats::{ClientCounters, ClientStats, LatencyWindow};
use super::upstream::{Upstream, UpstreamRequest};
use super::CallOptions;
use crate::batch::BatchAggregator;
use crate::cache::{CacheKey, CacheKeyGenerator, CacheStore, ResponseCache, StoredEntry};
use crate::config::ClientConfig;
use crate::events::{DispatchEvent, EventBus};
use crate::queue::{work_fn, RequestQueue, SubmitOptions, Work};
use crate::resilience::{CircuitBreaker, ConcurrencyLimiter, RateLimiter};
use crate::{Error, ErrorContext, Result};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type InflightCall = Shared<BoxFuture<'static, Result<Value>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    /// Follow `CallOptions::batch`, falling back to `batching_enabled`.
    Default,
    Batch,
}

pub(crate) struct ClientInner {
    pub(crate) config: ClientConfig,
    pub(crate) upstream: Arc<dyn Upstream>,
    pub(crate) keys: CacheKeyGenerator,
    pub(crate) cache: ResponseCache,
    pub(crate) store: Option<Arc<dyn CacheStore>>,
    pub(crate) queue: RequestQueue<Value>,
    pub(crate) aggregator: BatchAggregator<Value>,
    pub(crate) breaker: Option<Arc<CircuitBreaker>>,
    pub(crate) rate_limiter: Option<Arc<RateLimiter>>,
    pub(crate) events: EventBus,
    pub(crate) inflight: Mutex<HashMap<String, InflightCall>>,
    pub(crate) counters: ClientCounters,
    pub(crate) latencies: LatencyWindow,
}

/// Orchestrating client in front of one upstream endpoint.
///
/// Cheap to clone; clones share the cache, queue and counters. Build one per
/// upstream with [`DispatchClientBuilder`](super::DispatchClientBuilder) and
/// pass it to whoever needs it.
#[derive(Clone)]
pub struct DispatchClient {
    pub(crate) inner: Arc<ClientInner>,
}

impl DispatchClient {
    /// Run one logical call: cache, then queue (or batch), then cache again.
    pub async fn call(
        &self,
        identity: impl Into<String>,
        payload: impl Into<Value>,
        options: CallOptions,
    ) -> Result<Value> {
        let request = UpstreamRequest::new(identity, payload).with_options(options);
        self.inner.dispatch(request, None, Route::Default).await
    }

    pub async fn call_request(&self, request: UpstreamRequest) -> Result<Value> {
        self.inner.dispatch(request, None, Route::Default).await
    }

    /// Like [`call`](Self::call); cancelling `cancel` resolves the call with
    /// [`Error::Cancelled`] whether it is still queued or mid-attempt.
    /// Cancellable calls never share an in-flight execution.
    pub async fn call_with_cancel(
        &self,
        request: UpstreamRequest,
        cancel: CancellationToken,
    ) -> Result<Value> {
        self.inner.dispatch(request, Some(cancel), Route::Default).await
    }

    /// Run many calls through the batch aggregator. Results keep input order
    /// and each one stands alone.
    pub async fn batch_call(&self, requests: Vec<UpstreamRequest>) -> Vec<Result<Value>> {
        let calls = requests
            .into_iter()
            .map(|request| self.inner.dispatch(request, None, Route::Batch));
        futures::future::join_all(calls).await
    }

    /// Single-attempt, uncached probe. Never returns an error.
    pub async fn health_check(&self) -> HealthReport {
        let inner = &self.inner;
        let probe = inner.upstream.probe_request();
        let timeout = inner.config.request_timeout;
        let requested = Instant::now();
        let mut held_at: Option<Instant> = None;
        let probe_call = async {
            let _token = inner.queue.limiter().acquire().await?;
            held_at = Some(Instant::now());
            inner.upstream.invoke(&probe).await
        };
        // the slot wait counts against the same deadline as the probe
        let finished = tokio::time::timeout(timeout, probe_call).await;
        let outcome: Result<Value> = match finished {
            Ok(result) => result,
            Err(_) if held_at.is_none() => Err(Error::runtime_with_context(
                format!(
                    "No concurrency slot free within {}ms",
                    timeout.as_millis()
                ),
                ErrorContext::new().with_source("health_check"),
            )),
            Err(_) => Err(Error::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        };
        // upstream reachability only, not time spent queued for a slot
        let latency = held_at.unwrap_or(requested).elapsed();

        let circuit_open = inner.breaker.as_ref().map(|b| b.is_open()).unwrap_or(false);
        let avg_latency = inner.latencies.average();
        let status = health::classify(
            outcome.is_ok(),
            circuit_open,
            avg_latency,
            inner.config.degraded_latency,
        );
        let error = outcome.err().map(|e| e.to_string());
        info!(?status, latency_ms = latency.as_millis() as u64, "health check");
        HealthReport {
            status,
            upstream: inner.upstream.name().to_string(),
            latency,
            avg_latency,
            circuit_open,
            error,
        }
    }

    pub fn stats(&self) -> ClientStats {
        let inner = &self.inner;
        let c = &inner.counters;
        let cache = inner.cache.stats();
        let queue = inner.queue.stats();
        ClientStats {
            requests: ClientCounters::get(&c.requests),
            cache_hits: ClientCounters::get(&c.cache_hits),
            cache_misses: ClientCounters::get(&c.cache_misses),
            cache_entries: cache.entries,
            cache_evictions: cache.evictions,
            cache_expirations: cache.expirations,
            coalesced: ClientCounters::get(&c.coalesced),
            upstream_calls: ClientCounters::get(&c.upstream_calls),
            retries: queue.retries,
            failures: ClientCounters::get(&c.failures),
            rejected: queue.rejected,
            queue_depth: queue.pending,
            in_flight: queue.in_flight,
            batches_flushed: inner.aggregator.stats().flushes,
            avg_latency_ms: inner.latencies.average().as_secs_f64() * 1000.0,
            avg_wait_ms: queue.avg_wait.as_secs_f64() * 1000.0,
        }
    }

    /// Drop every cached response. Returns how many in-memory entries were
    /// removed; the persistent store, if any, is cleared as well.
    pub async fn clear_cache(&self) -> usize {
        let removed = self.inner.cache.clear();
        if let Some(store) = &self.inner.store {
            match store.clear().await {
                Ok(n) => debug!(store = store.name(), removed = n, "cache store cleared"),
                Err(e) => warn!(store = store.name(), error = %e, "cache store clear failed"),
            }
        }
        info!(removed, "cache cleared");
        removed
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.inner.events.subscribe()
    }

    /// Flush calls waiting in the batch buffer without waiting for the window.
    pub fn flush_batch(&self) -> usize {
        self.inner.aggregator.flush()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// The limiter bounding simultaneous upstream calls.
    pub fn limiter(&self) -> &ConcurrencyLimiter {
        self.inner.queue.limiter()
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.inner.cache
    }

    /// Snapshot of the optional circuit breaker.
    pub fn circuit_breaker(&self) -> Option<&CircuitBreaker> {
        self.inner.breaker.as_deref()
    }

    pub fn rate_limiter(&self) -> Option<&RateLimiter> {
        self.inner.rate_limiter.as_deref()
    }
}

impl ClientInner {
    fn lock_inflight(&self) -> MutexGuard<'_, HashMap<String, InflightCall>> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn dispatch(
        self: &Arc<Self>,
        request: UpstreamRequest,
        cancel: Option<CancellationToken>,
        route: Route,
    ) -> Result<Value> {
        ClientCounters::incr(&self.counters.requests);
        let key = self.keys.generate(
            &request.identity,
            &request.payload,
            &request.options.cache_params(),
        );
        let use_cache = self.config.cache_enabled && !request.options.bypass_cache;

        if use_cache {
            if let Some(value) = self.lookup(&key).await {
                ClientCounters::incr(&self.counters.cache_hits);
                debug!(key = %key, identity = %request.identity, "cache hit");
                self.events.emit(DispatchEvent::CacheHit {
                    key: key.hash.clone(),
                });
                return Ok(value);
            }
            ClientCounters::incr(&self.counters.cache_misses);
            debug!(key = %key, identity = %request.identity, "cache miss");
            self.events.emit(DispatchEvent::CacheMiss {
                key: key.hash.clone(),
            });
        }

        if use_cache && self.config.coalesce_inflight && cancel.is_none() {
            let (call, joined) = {
                let mut inflight = self.lock_inflight();
                match inflight.get(&key.hash).cloned() {
                    Some(existing) => (existing, true),
                    None => {
                        // run detached so the entry is removed even if every
                        // waiter is dropped
                        let task = tokio::spawn(
                            self.clone()
                                .execute(key.clone(), request, None, route, true),
                        );
                        let call = async move {
                            task.await.unwrap_or_else(|e| {
                                Err(Error::runtime_with_context(
                                    "Coalesced call task failed",
                                    ErrorContext::new()
                                        .with_details(e.to_string())
                                        .with_source("dispatch_client"),
                                ))
                            })
                        }
                        .boxed()
                        .shared();
                        inflight.insert(key.hash.clone(), call.clone());
                        (call, false)
                    }
                }
            };
            if joined {
                ClientCounters::incr(&self.counters.coalesced);
                debug!(key = %key, "joined in-flight call");
                self.events.emit(DispatchEvent::Coalesced { key: key.hash });
            }
            return call.await;
        }

        self.clone()
            .execute(key, request, cancel, route, false)
            .await
    }

    /// Memory first, then the persistent store.
    async fn lookup(&self, key: &CacheKey) -> Option<Value> {
        if let Some(value) = self.cache.get(key) {
            return Some(value);
        }
        let store = self.store.as_ref()?;
        match store.load(key).await {
            Ok(Some(entry)) => {
                let remaining = entry.remaining_ttl()?;
                self.cache.set_with_ttl(key, entry.value.clone(), remaining);
                debug!(key = %key, store = store.name(), "re-warmed from store");
                Some(entry.value)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(key = %key, store = store.name(), error = %e, "cache store load failed");
                None
            }
        }
    }

    async fn execute(
        self: Arc<Self>,
        key: CacheKey,
        request: UpstreamRequest,
        cancel: Option<CancellationToken>,
        route: Route,
        registered: bool,
    ) -> Result<Value> {
        let started = Instant::now();
        let use_cache = self.config.cache_enabled && !request.options.bypass_cache;
        let ttl = request.options.ttl.unwrap_or(self.config.ttl);
        let via_batch = route == Route::Batch
            || request
                .options
                .batch
                .unwrap_or(self.config.batching_enabled);

        let work = self.upstream_work(request);
        let opts = SubmitOptions {
            cancel: cancel.clone(),
            retry: None,
        };
        let ticket = if via_batch {
            Ok(self.aggregator.add(work, opts))
        } else {
            self.queue.submit_work(work, opts)
        };
        let result = match (ticket, cancel) {
            // dropping the ticket lets the queue skip the item if still waiting
            (Ok(ticket), Some(cancel)) => tokio::select! {
                _ = cancel.cancelled() => Err(Error::Cancelled),
                result = ticket => result,
            },
            (Ok(ticket), None) => ticket.await,
            (Err(e), _) => Err(e),
        };

        match &result {
            Ok(value) => {
                if use_cache {
                    self.store_value(&key, value, ttl).await;
                }
                let latency = started.elapsed();
                debug!(key = %key, latency_ms = latency.as_millis() as u64, "call completed");
                self.events.emit(DispatchEvent::Completed {
                    key: key.hash.clone(),
                    latency,
                });
            }
            Err(err) => {
                ClientCounters::incr(&self.counters.failures);
                warn!(key = %key, error = %err, "call failed");
                self.events.emit(DispatchEvent::Failed {
                    key: key.hash.clone(),
                    error: err.to_string(),
                });
            }
        }

        if registered {
            self.lock_inflight().remove(&key.hash);
        }
        result
    }

    async fn store_value(&self, key: &CacheKey, value: &Value, ttl: std::time::Duration) {
        self.cache.set_with_ttl(key, value.clone(), ttl);
        if let Some(store) = &self.store {
            let entry = StoredEntry::new(key, value.clone(), ttl);
            if let Err(e) = store.save(&entry).await {
                warn!(key = %key, store = store.name(), error = %e, "cache store save failed");
            }
        }
    }

    fn upstream_work(self: &Arc<Self>, request: UpstreamRequest) -> Work<Value> {
        let inner = self.clone();
        let request = Arc::new(request);
        work_fn(move || {
            let inner = inner.clone();
            let request = request.clone();
            async move {
                ClientCounters::incr(&inner.counters.upstream_calls);
                let started = Instant::now();
                let result = inner.upstream.invoke(&request).await;
                inner.latencies.record(started.elapsed());
                result
            }
        })
    }
}
