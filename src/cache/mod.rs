//! 响应缓存模块：带 TTL 与容量上限的内存缓存，以及可选的持久化存储。
//!
//! # Response Caching Module
//!
//! Successful upstream responses are cached so that logically identical
//! requests never reach the upstream twice within the TTL window.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`ResponseCache`] | In-memory LRU cache with per-entry TTL and counters |
//! | [`CacheKeyGenerator`] | SHA-256 key from identity, payload and output-affecting options |
//! | [`CacheStore`] | Trait for durable stores the cache can write through to |
//! | [`FileStore`] | One JSON file per key |
//!
//! ## Eviction
//!
//! - Expired entries are dropped lazily when read; there is no sweeper task.
//! - When full, inserting a new key evicts the least recently used entry.
//! - Failures are never cached.
//!
//! ## Example
//!
//! ```rust
//! use ai_lib_dispatch::cache::{CacheKeyGenerator, ResponseCache};
//! use serde_json::json;
//! use std::collections::BTreeMap;
//! use std::time::Duration;
//!
//! let cache = ResponseCache::new(1000, Duration::from_secs(3600));
//! let key = CacheKeyGenerator::new().generate("summarizer", &json!("text"), &BTreeMap::new());
//! cache.set(&key, json!({"summary": "..."}));
//! assert!(cache.get(&key).is_some());
//! ```

mod key;
mod memory;
mod store;

pub use key::{CacheKey, CacheKeyGenerator};
pub use memory::{CacheEntry, CacheStats, ResponseCache};
pub use store::{CacheStore, FileStore, StoredEntry};
