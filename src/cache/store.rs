//! Durable cache stores.
//!
//! A [`CacheStore`] sits behind the in-memory cache: the client consults it on
//! a memory miss and writes through to it after every successful upstream
//! call. Store failures are logged by the caller and never fail a request.

use super::key::CacheKey;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A persisted cache entry. Timestamps are wall-clock so entries survive restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub key: String,
    pub value: Value,
    pub created_at_ms: u64,
    pub ttl_ms: u64,
}

impl StoredEntry {
    pub fn new(key: &CacheKey, value: Value, ttl: Duration) -> Self {
        Self {
            key: key.hash.clone(),
            value,
            created_at_ms: now_ms(),
            ttl_ms: ttl.as_millis() as u64,
        }
    }

    /// Time left before expiry, or `None` once expired.
    pub fn remaining_ttl(&self) -> Option<Duration> {
        let expires_at = self.created_at_ms.saturating_add(self.ttl_ms);
        let now = now_ms();
        if now >= expires_at {
            None
        } else {
            Some(Duration::from_millis(expires_at - now))
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the entry if present and unexpired.
    async fn load(&self, key: &CacheKey) -> Result<Option<StoredEntry>>;
    async fn save(&self, entry: &StoredEntry) -> Result<()>;
    async fn remove(&self, key: &CacheKey) -> Result<bool>;
    /// Removes every entry, returning how many were removed.
    async fn clear(&self) -> Result<usize>;
    fn name(&self) -> &'static str;
}

/// One JSON file per key under a directory.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, hash: &str) -> PathBuf {
        self.dir.join(format!("{}.json", hash))
    }
}

#[async_trait]
impl CacheStore for FileStore {
    async fn load(&self, key: &CacheKey) -> Result<Option<StoredEntry>> {
        let path = self.path_for(&key.hash);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let entry: StoredEntry = serde_json::from_slice(&raw)?;
        if entry.remaining_ttl().is_none() {
            // expired on disk; drop it so the directory does not grow forever
            let _ = tokio::fs::remove_file(&path).await;
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn save(&self, entry: &StoredEntry) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(&entry.key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(entry)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> Result<bool> {
        match tokio::fs::remove_file(self.path_for(&key.hash)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear(&self) -> Result<usize> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let mut removed = 0;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                tokio::fs::remove_file(&path).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn name(&self) -> &'static str {
        "file"
    }
}
