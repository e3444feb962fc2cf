//! # ai-lib-dispatch
//!
//! 面向单一上游 AI 接口的弹性请求调度层：响应缓存、并发限制、失败感知重试与批处理。
//!
//! Resilient request dispatch for AI-Protocol: one client in front of one
//! rate-limited, high-latency upstream endpoint.
//!
//! ## Overview
//!
//! Every logical call goes through four cooperating stages:
//!
//! - **Cache**: identical requests within the TTL never reach the upstream twice
//! - **Queue**: FIFO admission with fail-fast backpressure (`QueueFull`)
//! - **Limiter**: at most `max_concurrency` upstream calls at once
//! - **Retry**: exponential backoff for transient failures, immediate
//!   propagation for fatal ones, a per-attempt timeout on every call
//!
//! Calls may optionally be grouped by the batch aggregator before they are
//! queued. Failures are never cached.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ai_lib_dispatch::{upstream_fn, CallOptions, ClientConfig, DispatchClientBuilder};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> ai_lib_dispatch::Result<()> {
//!     let upstream = upstream_fn(|req| async move {
//!         // call the model provider here
//!         Ok(json!({ "echo": req.payload }))
//!     });
//!     let client = DispatchClientBuilder::new(upstream)
//!         .config(ClientConfig::default().with_max_concurrency(2))
//!         .build()?;
//!
//!     let answer = client
//!         .call("summarizer", "some long text", CallOptions::new().with_temperature(0.2))
//!         .await?;
//!     println!("{answer}");
//!     println!("{:?}", client.stats());
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | Orchestrating client, builder, upstream trait, stats and health |
//! | [`cache`] | TTL + LRU response cache, key hashing, optional file store |
//! | [`queue`] | FIFO request queue with backpressure |
//! | [`batch`] | Size/time bounded batch aggregation |
//! | [`resilience`] | Concurrency limiter, retry policy, circuit breaker, rate limiter |
//! | [`config`] | Typed configuration (YAML, env overrides) |
//! | [`events`] | Typed event channel |
//! | [`error_code`] | Standard error codes and retryability |

pub mod batch;
pub mod cache;
pub mod client;
pub mod config;
pub mod error_code;
pub mod events;
pub mod queue;
pub mod resilience;

// Re-export main types for convenience
pub use client::{
    upstream_fn, CallOptions, ClientStats, DispatchClient, DispatchClientBuilder, HealthReport,
    HealthStatus, Upstream, UpstreamRequest,
};
pub use config::ClientConfig;
pub use error_code::StandardErrorCode;
pub use events::{DispatchEvent, FlushReason};
pub use tokio_util::sync::CancellationToken;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
