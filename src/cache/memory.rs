//! In-memory response cache.

use super::key::CacheKey;
use lru::LruCache;
use serde::Serialize;
use serde_json::Value;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// An immutable cached response. Overwrites replace the whole entry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    pub created_at: Instant,
    pub ttl: Duration,
}

impl CacheEntry {
    fn new(key: String, value: Value, ttl: Duration) -> Self {
        Self { key, value, created_at: Instant::now(), ttl }
    }

    pub fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.ttl
    }

    pub fn remaining_ttl(&self) -> Duration {
        self.ttl.saturating_sub(self.created_at.elapsed())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 { 0.0 } else { self.hits as f64 / total as f64 }
    }
}

#[derive(Default)]
struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

/// TTL- and size-bounded cache with least-recently-used eviction.
///
/// - `get` bumps recency and lazily drops expired entries (no sweeper task).
/// - `set` on a full cache evicts exactly one LRU entry first; overwriting an
///   existing key is not an eviction.
pub struct ResponseCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    default_ttl: Duration,
    stats: AtomicStats,
}

impl ResponseCache {
    pub fn new(max_entries: usize, default_ttl: Duration) -> Self {
        let cap = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
            default_ttl,
            stats: AtomicStats::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &CacheKey) -> Option<Value> {
        let mut entries = self.lock();
        let expired = match entries.peek(&key.hash) {
            Some(entry) => entry.is_expired(),
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };
        if expired {
            entries.pop(&key.hash);
            self.stats.expirations.fetch_add(1, Ordering::Relaxed);
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "cache entry expired");
            return None;
        }
        self.stats.hits.fetch_add(1, Ordering::Relaxed);
        entries.get(&key.hash).map(|e| e.value.clone())
    }

    /// Look up an entry without touching recency or counters.
    pub fn peek(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.lock().peek(&key.hash).filter(|e| !e.is_expired()).cloned()
    }

    pub fn set(&self, key: &CacheKey, value: Value) {
        self.set_with_ttl(key, value, self.default_ttl)
    }

    pub fn set_with_ttl(&self, key: &CacheKey, value: Value, ttl: Duration) {
        let mut entries = self.lock();
        if !entries.contains(&key.hash) && entries.len() >= entries.cap().get() {
            if let Some((evicted, _)) = entries.pop_lru() {
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(key = %evicted, "cache entry evicted");
            }
        }
        entries.put(key.hash.clone(), CacheEntry::new(key.hash.clone(), value, ttl));
        self.stats.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn remove(&self, key: &CacheKey) -> bool {
        self.lock().pop(&key.hash).is_some()
    }

    /// Drop every entry, returning how many were held.
    pub fn clear(&self) -> usize {
        let mut entries = self.lock();
        let n = entries.len();
        entries.clear();
        n
    }

    /// Entries currently held, including expired ones not yet observed.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            sets: self.stats.sets.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            expirations: self.stats.expirations.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(s: &str) -> CacheKey {
        CacheKey::new(s)
    }

    #[test]
    fn miss_then_hit() {
        let cache = ResponseCache::new(4, Duration::from_secs(60));
        assert!(cache.get(&key("a")).is_none());
        cache.set(&key("a"), json!("A"));
        assert_eq!(cache.get(&key("a")), Some(json!("A")));
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.sets), (1, 1, 1));
        assert_eq!(stats.hit_ratio(), 0.5);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_dropped_lazily() {
        let cache = ResponseCache::new(4, Duration::from_millis(100));
        cache.set(&key("a"), json!(1));
        tokio::time::advance(Duration::from_millis(50)).await;
        assert_eq!(cache.get(&key("a")), Some(json!(1)));
        tokio::time::advance(Duration::from_millis(60)).await;
        // still resident until someone looks
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&key("a")).is_none());
        assert_eq!(cache.len(), 0);
        let stats = cache.stats();
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.evictions, 0);
    }

    #[test]
    fn full_cache_evicts_exactly_the_lru_entry() {
        let cache = ResponseCache::new(2, Duration::from_secs(60));
        cache.set(&key("a"), json!(1));
        cache.set(&key("b"), json!(2));
        // touch "a" so "b" becomes least recently used
        assert!(cache.get(&key("a")).is_some());
        cache.set(&key("c"), json!(3));
        assert_eq!(cache.len(), 2);
        assert!(cache.peek(&key("b")).is_none());
        assert!(cache.peek(&key("a")).is_some());
        assert!(cache.peek(&key("c")).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn overwrite_is_not_an_eviction() {
        let cache = ResponseCache::new(2, Duration::from_secs(60));
        cache.set(&key("a"), json!(1));
        cache.set(&key("b"), json!(2));
        cache.set(&key("a"), json!(10));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(cache.get(&key("a")), Some(json!(10)));
    }

    #[test]
    fn clear_reports_count() {
        let cache = ResponseCache::new(8, Duration::from_secs(60));
        for i in 0..5 {
            cache.set(&key(&i.to_string()), json!(i));
        }
        assert_eq!(cache.clear(), 5);
        assert!(cache.is_empty());
        assert_eq!(cache.clear(), 0);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let cache = ResponseCache::new(0, Duration::from_secs(1));
        assert_eq!(cache.capacity(), 1);
    }

    #[test]
    fn per_entry_ttl_overrides_default() {
        let cache = ResponseCache::new(2, Duration::from_secs(60));
        cache.set_with_ttl(&key("short"), json!(1), Duration::from_millis(5));
        let entry = cache.peek(&key("short")).unwrap();
        assert_eq!(entry.ttl, Duration::from_millis(5));
    }
}
