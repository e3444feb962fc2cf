use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Probe succeeded and latency is normal.
    Healthy,
    /// Probe succeeded, but average latency is above the threshold or the
    /// circuit breaker is open.
    Degraded,
    /// Probe failed.
    Unhealthy,
}

/// Result of [`DispatchClient::health_check`](crate::DispatchClient::health_check).
/// Failures are reported here, never raised.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub upstream: String,
    /// Latency of the probe itself.
    #[serde(rename = "latency_ms", with = "crate::config::duration_ms")]
    pub latency: Duration,
    /// Rolling average over recent upstream calls.
    #[serde(rename = "avg_latency_ms", with = "crate::config::duration_ms")]
    pub avg_latency: Duration,
    pub circuit_open: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthReport {
    pub fn is_reachable(&self) -> bool {
        self.status != HealthStatus::Unhealthy
    }
}

pub(crate) fn classify(
    probe_ok: bool,
    circuit_open: bool,
    avg_latency: Duration,
    degraded_latency: Duration,
) -> HealthStatus {
    if !probe_ok {
        HealthStatus::Unhealthy
    } else if circuit_open || avg_latency > degraded_latency {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}
