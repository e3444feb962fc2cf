use super::options::CallOptions;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;

/// One logical request to the upstream endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamRequest {
    /// Agent or endpoint name the payload is meant for.
    pub identity: String,
    pub payload: Value,
    #[serde(default)]
    pub options: CallOptions,
}

impl UpstreamRequest {
    pub fn new(identity: impl Into<String>, payload: impl Into<Value>) -> Self {
        Self {
            identity: identity.into(),
            payload: payload.into(),
            options: CallOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }
}

/// The transport the client wraps: model-provider HTTP call, SDK, mock.
///
/// Implementations report failures with a classifiable [`Error`](crate::Error)
/// (usually via [`Error::from_status`](crate::Error::from_status)) so the
/// retry policy can tell transient from fatal. The future may be dropped at
/// any await point when the attempt timeout fires.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn invoke(&self, request: &UpstreamRequest) -> Result<Value>;

    /// Minimal request used by health checks.
    fn probe_request(&self) -> UpstreamRequest {
        UpstreamRequest::new("health", "ping")
            .with_options(CallOptions::new().with_max_tokens(1))
    }

    fn name(&self) -> &str {
        "upstream"
    }
}

/// [`Upstream`] backed by an async closure.
pub struct FnUpstream<F> {
    name: String,
    f: F,
}

impl<F> FnUpstream<F> {
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Build an [`Upstream`] from `Fn(UpstreamRequest) -> Future<Output = Result<Value>>`.
pub fn upstream_fn<F, Fut>(f: F) -> FnUpstream<F>
where
    F: Fn(UpstreamRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    FnUpstream {
        name: "fn".to_string(),
        f,
    }
}

#[async_trait]
impl<F, Fut> Upstream for FnUpstream<F>
where
    F: Fn(UpstreamRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    async fn invoke(&self, request: &UpstreamRequest) -> Result<Value> {
        (self.f)(request.clone()).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
