//! Prometheus Metrics Definitions
//!
//! Defines all turnstile metrics with their labels and exposes a /metrics
//! endpoint for Prometheus scraping.

use axum::{http::StatusCode, response::IntoResponse};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};
use turnstile_storage::{CacheObserver, LookupOutcome};

use crate::error::{ApiError, ApiResult};

/// HTTP request latency buckets (seconds)
/// Covers: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance - initialized once at startup
pub static METRICS: Lazy<ApiResult<TurnstileMetrics>> = Lazy::new(TurnstileMetrics::new);

/// The registered metrics, or `None` if registration failed.
///
/// Registration failure is logged once; recording then becomes a no-op.
pub fn metrics() -> Option<&'static TurnstileMetrics> {
    static REPORTED: std::sync::Once = std::sync::Once::new();
    match METRICS.as_ref() {
        Ok(metrics) => Some(metrics),
        Err(e) => {
            REPORTED.call_once(|| tracing::error!(error = %e, "Metrics unavailable"));
            None
        }
    }
}

/// Container for all turnstile metrics.
#[derive(Clone)]
pub struct TurnstileMetrics {
    /// HTTP request counter - labels: method, path, status
    pub http_requests_total: CounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// Gate decisions - labels: class, outcome (allowed/denied/bypassed)
    pub quota_decisions_total: CounterVec,

    /// Memoized lookups - labels: prefix, outcome (hit/miss)
    pub cache_lookups_total: CounterVec,
}

impl TurnstileMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            http_requests_total: register_counter_vec!(
                "turnstile_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register http_requests_total: {}", e)))?,

            http_request_duration_seconds: register_histogram_vec!(
                "turnstile_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register http_request_duration_seconds: {}", e)))?,

            quota_decisions_total: register_counter_vec!(
                "turnstile_quota_decisions_total",
                "Quota gate decisions by resource class",
                &["class", "outcome"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register quota_decisions_total: {}", e)))?,

            cache_lookups_total: register_counter_vec!(
                "turnstile_cache_lookups_total",
                "Memoized cache lookups by key prefix",
                &["prefix", "outcome"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register cache_lookups_total: {}", e)))?,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, &status_str])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    /// Record a gate decision.
    pub fn record_quota_decision(&self, class: &str, outcome: &str) {
        self.quota_decisions_total
            .with_label_values(&[class, outcome])
            .inc();
    }

    /// Record a memoized lookup.
    pub fn record_cache_lookup(&self, prefix: &str, outcome: LookupOutcome) {
        self.cache_lookups_total
            .with_label_values(&[prefix, outcome.as_str()])
            .inc();
    }
}

/// Feeds memoizer lookups into `turnstile_cache_lookups_total`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsCacheObserver;

impl CacheObserver for MetricsCacheObserver {
    fn on_lookup(&self, prefix: &str, outcome: LookupOutcome) {
        if let Some(metrics) = metrics() {
            metrics.record_cache_lookup(prefix, outcome);
        }
    }
}

/// Handler for GET /metrics endpoint.
///
/// Returns Prometheus text format metrics.
pub async fn metrics_handler() -> impl IntoResponse {
    // Registers the turnstile families before the first scrape.
    let _ = metrics();

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::core::Collector;

    #[test]
    fn test_metrics_creation() -> Result<(), String> {
        let metrics = METRICS
            .as_ref()
            .map_err(|e| format!("Metrics init failed: {}", e.message))?;
        assert!(!metrics.http_requests_total.desc().is_empty());
        Ok(())
    }

    #[test]
    fn test_record_quota_decision() -> Result<(), String> {
        let metrics = metrics().ok_or("Metrics init failed")?;
        let before = metrics
            .quota_decisions_total
            .with_label_values(&["metrics_test", "denied"])
            .get();
        metrics.record_quota_decision("metrics_test", "denied");
        let after = metrics
            .quota_decisions_total
            .with_label_values(&["metrics_test", "denied"])
            .get();
        assert_eq!(after - before, 1.0);
        Ok(())
    }

    #[test]
    fn test_cache_observer_counts_lookups() -> Result<(), String> {
        let metrics = metrics().ok_or("Metrics init failed")?;
        let counter = metrics
            .cache_lookups_total
            .with_label_values(&["observer_test", "hit"]);
        let before = counter.get();
        MetricsCacheObserver.on_lookup("observer_test", LookupOutcome::Hit);
        assert_eq!(counter.get() - before, 1.0);
        Ok(())
    }

    #[test]
    fn test_record_http_request() -> Result<(), String> {
        let metrics = metrics().ok_or("Metrics init failed")?;
        metrics.record_http_request("GET", "/admin/cache/stats", 200, 0.015);
        Ok(())
    }
}
