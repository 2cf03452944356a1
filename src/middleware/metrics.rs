//! Prometheus metrics recorder (§4.9).
//!
//! Exposes a standard `/metrics` endpoint that Prometheus can scrape.
//! Counters/histograms are updated inline as requests and invocations
//! complete; gauges are periodic snapshots set by a background job
//! (`jobs::metrics_gauges`) rather than updated per-request.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Instant;

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use once_cell::sync::Lazy;
use prometheus::{
    opts, register_counter_vec, register_histogram_vec, register_int_gauge, CounterVec, Encoder,
    HistogramVec, IntGauge, TextEncoder,
};
use regex::Regex;

/// Bounds path-label cardinality: ids are replaced with `{id}` before
/// hitting Prometheus, but an attacker-controlled path segment count could
/// still blow this up, so anything past this many distinct normalized
/// paths collapses to "other".
const MAX_PATH_CARDINALITY: usize = 10_000;

static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}").unwrap()
});
static NUMERIC_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/\d+").unwrap());
static SEEN_PATHS: Lazy<Mutex<HashSet<String>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// Collapses UUID and numeric-id path segments to `{id}`, e.g.
/// `/api/v1/agents/3fa8.../invoke` → `/api/v1/agents/{id}/invoke`. Once the
/// number of distinct normalized paths crosses `MAX_PATH_CARDINALITY`
/// (malformed or crawler-generated paths), further unseen paths collapse to
/// "other" rather than growing the label set without bound.
pub fn normalize_path(path: &str) -> String {
    let normalized = UUID_RE.replace_all(path, "{id}");
    let normalized = NUMERIC_ID_RE.replace_all(&normalized, "/{id}").into_owned();

    let mut seen = SEEN_PATHS.lock().unwrap();
    if seen.contains(&normalized) {
        return normalized;
    }
    if seen.len() >= MAX_PATH_CARDINALITY {
        return "other".to_string();
    }
    seen.insert(normalized.clone());
    normalized
}

pub struct MetricsRecorder {
    api_requests_total: CounterVec,
    executions_total: CounterVec,
    auth_attempts_total: CounterVec,
    deployments_total: CounterVec,

    request_latency_seconds: HistogramVec,
    execution_latency_seconds: HistogramVec,
    database_query_latency_seconds: HistogramVec,

    active_deployments: IntGauge,
    active_gateways: IntGauge,
    active_users: IntGauge,
    pending_invitations: IntGauge,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        let api_requests_total = register_counter_vec!(
            opts!("api_requests_total", "Total HTTP requests handled"),
            &["method", "path", "status_code"]
        )
        .expect("failed to register api_requests_total");

        let executions_total = register_counter_vec!(
            opts!("executions_total", "Total external agent invocations by outcome"),
            &["status"]
        )
        .expect("failed to register executions_total");

        let auth_attempts_total = register_counter_vec!(
            opts!("auth_attempts_total", "Total authentication attempts by outcome"),
            &["method", "outcome"]
        )
        .expect("failed to register auth_attempts_total");

        let deployments_total = register_counter_vec!(
            opts!("deployments_total", "Total deployment lifecycle transitions"),
            &["status"]
        )
        .expect("failed to register deployments_total");

        let request_latency_seconds = register_histogram_vec!(
            prometheus::histogram_opts!(
                "request_latency_seconds",
                "HTTP request latency in seconds",
                vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
            ),
            &["method", "path"]
        )
        .expect("failed to register request_latency_seconds");

        let execution_latency_seconds = register_histogram_vec!(
            prometheus::histogram_opts!(
                "execution_latency_seconds",
                "External agent invocation latency in seconds",
                vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
            ),
            &["status"]
        )
        .expect("failed to register execution_latency_seconds");

        let database_query_latency_seconds = register_histogram_vec!(
            prometheus::histogram_opts!(
                "database_query_latency_seconds",
                "Database query latency in seconds",
                vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]
            ),
            &["operation"]
        )
        .expect("failed to register database_query_latency_seconds");

        Self {
            api_requests_total,
            executions_total,
            auth_attempts_total,
            deployments_total,
            request_latency_seconds,
            execution_latency_seconds,
            database_query_latency_seconds,
            active_deployments: register_int_gauge!("active_deployments", "Currently active deployments")
                .expect("failed to register active_deployments"),
            active_gateways: register_int_gauge!("active_gateways", "Currently active gateways")
                .expect("failed to register active_gateways"),
            active_users: register_int_gauge!("active_users", "Currently active users")
                .expect("failed to register active_users"),
            pending_invitations: register_int_gauge!("pending_invitations", "Invitations awaiting acceptance")
                .expect("failed to register pending_invitations"),
        }
    }

    pub fn record_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let normalized = normalize_path(path);
        self.api_requests_total
            .with_label_values(&[method, &normalized, &status.to_string()])
            .inc();
        self.request_latency_seconds
            .with_label_values(&[method, &normalized])
            .observe(duration_secs);
    }

    pub fn record_execution(&self, status: &str, duration_secs: f64) {
        self.executions_total.with_label_values(&[status]).inc();
        self.execution_latency_seconds
            .with_label_values(&[status])
            .observe(duration_secs);
    }

    pub fn record_auth_attempt(&self, method: &str, outcome: &str) {
        self.auth_attempts_total.with_label_values(&[method, outcome]).inc();
    }

    pub fn record_deployment_transition(&self, status: &str) {
        self.deployments_total.with_label_values(&[status]).inc();
    }

    pub fn observe_db_query(&self, operation: &str, duration_secs: f64) {
        self.database_query_latency_seconds
            .with_label_values(&[operation])
            .observe(duration_secs);
    }

    pub fn set_active_deployments(&self, n: i64) {
        self.active_deployments.set(n);
    }

    pub fn set_active_gateways(&self, n: i64) {
        self.active_gateways.set(n);
    }

    pub fn set_active_users(&self, n: i64) {
        self.active_users.set(n);
    }

    pub fn set_pending_invitations(&self, n: i64) {
        self.pending_invitations.set(n);
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide recorder. Registering the same metric name twice panics,
/// so this must be the only place `MetricsRecorder::new()` is called.
pub static RECORDER: Lazy<MetricsRecorder> = Lazy::new(MetricsRecorder::new);

/// Times the request and records it against `RECORDER`. Mounted as the
/// outermost layer so its latency measurement includes every other
/// middleware in the stack.
pub async fn record(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let start = Instant::now();

    let resp = next.run(req).await;

    RECORDER.record_request(&method, &path, resp.status().as_u16(), start.elapsed().as_secs_f64());
    resp
}

/// Encode all registered metrics as Prometheus text format, for the
/// `/metrics` HTTP handler.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_uuid_segment() {
        assert_eq!(
            normalize_path("/api/v1/agents/3fa85f64-5717-4562-b3fc-2c963f66afa6/invoke"),
            "/api/v1/agents/{id}/invoke"
        );
    }

    #[test]
    fn normalizes_numeric_segment() {
        assert_eq!(normalize_path("/api/v1/tokens/42/spend"), "/api/v1/tokens/{id}/spend");
    }

    #[test]
    fn leaves_non_id_paths_unchanged() {
        assert_eq!(normalize_path("/api/v1/agents"), "/api/v1/agents");
    }

    #[test]
    fn encode_metrics_returns_ascii_text() {
        let output = encode_metrics();
        assert!(output.is_ascii());
    }
}
