//! Shared fixtures: an instrumented upstream driven by the request payload.
//!
//! Payload keys understood by [`TestUpstream`]:
//! - `sleep_ms`: latency for this request instead of the default
//! - `fail`: `"fatal"` (HTTP 401) or `"transient"` (HTTP 503) on every attempt

#![allow(dead_code)]

use ai_lib_dispatch::{
    ClientConfig, DispatchClient, DispatchClientBuilder, Error, Result, Upstream, UpstreamRequest,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct TestUpstream {
    calls: AtomicU32,
    current: AtomicUsize,
    peak: AtomicUsize,
    latency: Duration,
    scripted: Mutex<VecDeque<Error>>,
}

/// Decrements the in-flight gauge even when the attempt is dropped by a timeout.
struct Gauge<'a>(&'a AtomicUsize);

impl Drop for Gauge<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl TestUpstream {
    pub fn new(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            latency,
            scripted: Mutex::new(VecDeque::new()),
        })
    }

    pub fn instant() -> Arc<Self> {
        Self::new(Duration::ZERO)
    }

    /// The next attempts fail with these errors, in order, whatever the payload.
    pub fn fail_next(&self, errors: impl IntoIterator<Item = Error>) {
        self.scripted.lock().unwrap().extend(errors);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn client(self: &Arc<Self>, config: ClientConfig) -> DispatchClient {
        DispatchClientBuilder::from_arc(self.clone())
            .config(config)
            .build()
            .unwrap()
    }
}

#[async_trait]
impl Upstream for TestUpstream {
    async fn invoke(&self, request: &UpstreamRequest) -> Result<Value> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _gauge = Gauge(&self.current);

        let sleep = request
            .payload
            .get("sleep_ms")
            .and_then(Value::as_u64)
            .map(Duration::from_millis)
            .unwrap_or(self.latency);
        if !sleep.is_zero() {
            tokio::time::sleep(sleep).await;
        }

        if let Some(err) = self.scripted.lock().unwrap().pop_front() {
            return Err(err);
        }
        match request.payload.get("fail").and_then(Value::as_str) {
            Some("fatal") => Err(Error::from_status(401, "invalid api key")),
            Some("transient") => Err(Error::from_status(503, "overloaded")),
            _ => Ok(json!({
                "identity": request.identity,
                "payload": request.payload,
                "call": n,
            })),
        }
    }

    fn name(&self) -> &str {
        "test"
    }
}

/// Defaults with a short backoff so retry tests stay quick.
pub fn test_config() -> ClientConfig {
    ClientConfig::default()
        .with_base_retry_delay(Duration::from_millis(10))
        .with_request_timeout(Duration::from_secs(5))
}
