//! Cache key generation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Deterministic identity of a logically-equivalent upstream request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub hash: String,
    pub identity: Option<String>,
}

impl CacheKey {
    pub fn new(hash: impl Into<String>) -> Self {
        Self { hash: hash.into(), identity: None }
    }
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self { self.identity = Some(identity.into()); self }
    pub fn as_str(&self) -> &str { &self.hash }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{}", self.hash) }
}

impl From<&str> for CacheKey { fn from(s: &str) -> Self { Self::new(s) } }
impl From<String> for CacheKey { fn from(s: String) -> Self { Self::new(s) } }

/// Hashes `(identity, payload, cache-relevant params)` into a [`CacheKey`].
///
/// The three parts are placed in a `BTreeMap` and serialized to JSON before
/// hashing. `serde_json` objects are key-sorted, so field order inside the
/// payload never changes the key.
#[derive(Debug, Clone, Default)]
pub struct CacheKeyGenerator {
    salt: Option<String>,
}

impl CacheKeyGenerator {
    pub fn new() -> Self { Self { salt: None } }
    pub fn with_salt(mut self, salt: impl Into<String>) -> Self { self.salt = Some(salt.into()); self }

    pub fn generate(&self, identity: &str, payload: &Value, params: &BTreeMap<String, Value>) -> CacheKey {
        let mut parts: BTreeMap<&str, Value> = BTreeMap::new();
        parts.insert("identity", Value::String(identity.to_string()));
        parts.insert("payload", payload.clone());
        if !params.is_empty() {
            parts.insert("params", serde_json::to_value(params).unwrap_or(Value::Null));
        }
        if let Some(ref s) = self.salt { parts.insert("salt", Value::String(s.clone())); }
        let canonical = serde_json::to_string(&parts).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let hash: String = hasher.finalize().iter().map(|b| format!("{:02x}", b)).collect();
        CacheKey::new(hash).with_identity(identity)
    }
}
