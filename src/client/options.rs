use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Per-call options.
///
/// `model`, `temperature`, `max_tokens`, `top_p` and `params` change what the
/// upstream returns and are part of the cache key. `metadata` and the
/// dispatch knobs (`ttl`, `bypass_cache`, `batch`) are not.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Any other output-affecting parameters.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, Value>,
    /// Passed to the upstream, ignored by the cache key (trace ids and such).
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
    /// Cache lifetime for this call's response instead of the configured one.
    #[serde(skip)]
    pub ttl: Option<Duration>,
    /// Skip the cache lookup and do not store the response.
    #[serde(skip)]
    pub bypass_cache: bool,
    /// Route through the batch aggregator; `None` follows `batching_enabled`.
    #[serde(skip)]
    pub batch: Option<bool>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_top_p(mut self, top_p: f64) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_metadata(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(name.into(), value.into());
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn bypass_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }

    pub fn with_batching(mut self, enabled: bool) -> Self {
        self.batch = Some(enabled);
        self
    }

    /// The options that take part in the cache key.
    pub fn cache_params(&self) -> BTreeMap<String, Value> {
        let mut out = self.params.clone();
        if let Some(model) = &self.model {
            out.insert("model".into(), Value::from(model.clone()));
        }
        if let Some(t) = self.temperature {
            out.insert("temperature".into(), Value::from(t));
        }
        if let Some(m) = self.max_tokens {
            out.insert("max_tokens".into(), Value::from(m));
        }
        if let Some(p) = self.top_p {
            out.insert("top_p".into(), Value::from(p));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_params_exclude_dispatch_knobs() {
        let opts = CallOptions::new()
            .with_temperature(0.2)
            .with_max_tokens(256)
            .with_param("stop", "END")
            .with_metadata("trace_id", "abc")
            .with_ttl(Duration::from_secs(5))
            .with_batching(true);
        let params = opts.cache_params();
        assert_eq!(params.len(), 3);
        assert_eq!(params["temperature"], Value::from(0.2));
        assert_eq!(params["max_tokens"], Value::from(256));
        assert!(!params.contains_key("trace_id"));
    }

    #[test]
    fn deserializes_with_defaults() {
        let opts: CallOptions = serde_json::from_str(r#"{"temperature": 0.7}"#).unwrap();
        assert_eq!(opts.temperature, Some(0.7));
        assert!(opts.params.is_empty());
        assert!(!opts.bypass_cache);
    }
}
