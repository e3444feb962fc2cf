use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Point-in-time view of client counters. Advisory only.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClientStats {
    /// Logical calls made (`call`, `batch_call` items), cache hits included.
    pub requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_entries: usize,
    pub cache_evictions: u64,
    pub cache_expirations: u64,
    /// Calls that joined an identical in-flight call.
    pub coalesced: u64,
    /// Upstream invocations, every attempt counted.
    pub upstream_calls: u64,
    pub retries: u64,
    pub failures: u64,
    pub rejected: u64,
    pub queue_depth: usize,
    pub in_flight: usize,
    pub batches_flushed: u64,
    /// Mean upstream latency over the rolling window.
    pub avg_latency_ms: f64,
    /// Mean time items spent queued before execution.
    pub avg_wait_ms: f64,
}

impl ClientStats {
    pub fn cache_hit_ratio(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct ClientCounters {
    pub requests: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub coalesced: AtomicU64,
    pub upstream_calls: AtomicU64,
    pub failures: AtomicU64,
}

impl ClientCounters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// Latencies of the most recent `capacity` upstream invocations.
#[derive(Debug)]
pub(crate) struct LatencyWindow {
    capacity: usize,
    samples: Mutex<VecDeque<Duration>>,
}

impl LatencyWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn record(&self, latency: Duration) {
        let mut samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        if samples.len() == self.capacity {
            samples.pop_front();
        }
        samples.push_back(latency);
    }

    pub fn average(&self) -> Duration {
        let samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        if samples.is_empty() {
            return Duration::ZERO;
        }
        samples.iter().sum::<Duration>() / samples.len() as u32
    }
}
