//! Prometheus metrics for gateway-auth

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::Result;
use crate::error::Error;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static START_TIME: OnceLock<Instant> = OnceLock::new();

const METRIC_UPTIME: &str = "gateway_auth_uptime_seconds";
const METRIC_INFO: &str = "gateway_auth_info";

// Connection authorization
const METRIC_AUTH_ACCEPTED: &str = "gateway_auth_connections_accepted_total";
const METRIC_AUTH_REJECTED: &str = "gateway_auth_connections_rejected_total";

// Token broker
const METRIC_TOKEN_REQUESTS: &str = "gateway_auth_token_requests_total";
const METRIC_TOKEN_DURATION: &str = "gateway_auth_token_request_duration_seconds";
const METRIC_CACHE_HITS: &str = "gateway_auth_token_cache_hits_total";
const METRIC_CACHE_MISSES: &str = "gateway_auth_token_cache_misses_total";

/// Initialize Prometheus metrics recorder.
pub fn init_metrics() -> Result<()> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| Error::Config(format!("Failed to install metrics recorder: {e}")))?;

    PROMETHEUS_HANDLE.set(handle).ok();
    START_TIME.set(Instant::now()).ok();

    register_metrics();
    tracing::info!("Prometheus metrics initialized");
    Ok(())
}

fn register_metrics() {
    describe_gauge!(METRIC_UPTIME, "Process uptime in seconds");
    describe_gauge!(METRIC_INFO, "Build information (always 1)");

    describe_counter!(METRIC_AUTH_ACCEPTED, "Connections accepted, by method");
    describe_counter!(METRIC_AUTH_REJECTED, "Connections rejected, by reason");

    describe_counter!(METRIC_TOKEN_REQUESTS, "Token endpoint requests, by grant and status");
    describe_histogram!(METRIC_TOKEN_DURATION, "Token endpoint round-trip in seconds");
    describe_counter!(METRIC_CACHE_HITS, "Downstream token cache hits");
    describe_counter!(METRIC_CACHE_MISSES, "Downstream token cache misses");

    gauge!(
        METRIC_INFO,
        "version" => env!("CARGO_PKG_VERSION"),
    )
    .set(1.0);
}

/// Render metrics in Prometheus text format.
#[must_use]
pub fn render_metrics() -> String {
    if let Some(start) = START_TIME.get() {
        gauge!(METRIC_UPTIME).set(start.elapsed().as_secs_f64());
    }

    PROMETHEUS_HANDLE
        .get()
        .map(PrometheusHandle::render)
        .unwrap_or_default()
}

/// Record an accepted connection.
pub fn record_auth_accepted(method: &str) {
    counter!(METRIC_AUTH_ACCEPTED, "method" => method.to_owned()).increment(1);
}

/// Record a rejected connection by its reason code.
pub fn record_auth_rejected(reason: &str) {
    counter!(METRIC_AUTH_REJECTED, "reason" => reason.to_owned()).increment(1);
}

/// Record a downstream token cache hit.
pub fn record_broker_cache_hit() {
    counter!(METRIC_CACHE_HITS).increment(1);
}

/// Record a downstream token cache miss.
pub fn record_broker_cache_miss() {
    counter!(METRIC_CACHE_MISSES).increment(1);
}

/// Record a token endpoint request.
pub fn record_token_request(grant: &str, status: &str, duration: Duration) {
    histogram!(METRIC_TOKEN_DURATION, "grant" => grant.to_owned()).record(duration.as_secs_f64());

    counter!(
        METRIC_TOKEN_REQUESTS,
        "grant" => grant.to_owned(),
        "status" => status.to_owned(),
    )
    .increment(1);
}
