//! Orchestrating client for one upstream endpoint.
//!
//! Developer-friendly goal: keep the public surface small and predictable.
//! Implementation details are split into submodules under `src/client/`.

pub mod builder;
pub mod core;
mod health;
mod options;
mod stats;
pub mod upstream;

pub use builder::DispatchClientBuilder;
pub use core::DispatchClient;
pub use health::{HealthReport, HealthStatus};
pub use options::CallOptions;
pub use stats::ClientStats;
pub use upstream::{upstream_fn, FnUpstream, Upstream, UpstreamRequest};
