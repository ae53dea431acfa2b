//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define the recording contract the pipeline calls into ([`MetricsSink`])
//! - Expose Prometheus-compatible metrics through the `metrics` facade
//! - Provide an in-process sink for embedders that read metrics directly
//!
//! # Metrics
//! - `rpc_server_requests_total` (counter): requests by method, operation, status
//! - `rpc_server_request_duration_seconds` (histogram): handler latency
//! - `rpc_server_request_size_bytes` / `rpc_server_response_size_bytes` (histogram)
//! - `rpc_server_inflight_requests` (gauge): currently executing requests
//! - `rpc_server_errors_total` (counter): errors by method, path/operation, reason
//!
//! # Design Decisions
//! - Every sink method defaults to a no-op, so a sink that leaves one out
//!   simply disables that recording
//! - Sinks are shared across requests and must tolerate concurrent calls

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};

pub const REQUESTS_TOTAL: &str = "rpc_server_requests_total";
pub const REQUEST_DURATION: &str = "rpc_server_request_duration_seconds";
pub const REQUEST_SIZE: &str = "rpc_server_request_size_bytes";
pub const RESPONSE_SIZE: &str = "rpc_server_response_size_bytes";
pub const INFLIGHT_REQUESTS: &str = "rpc_server_inflight_requests";
pub const ERRORS_TOTAL: &str = "rpc_server_errors_total";

/// Latency buckets in seconds, tuned for typical RPC latencies.
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Size buckets in bytes, 64 B to 4 MiB.
const SIZE_BUCKETS: &[f64] = &[
    64.0, 256.0, 1024.0, 4096.0, 16384.0, 65536.0, 262144.0, 1048576.0, 4194304.0,
];

/// Recording contract used by the request pipeline.
pub trait MetricsSink: Send + Sync {
    fn inflight_inc(&self, _operation: &str) {}

    fn inflight_dec(&self, _operation: &str) {}

    fn observe_request_size(&self, _method: &str, _operation: &str, _bytes: usize) {}

    fn observe_response_size(&self, _method: &str, _operation: &str, _bytes: usize) {}

    fn observe_duration(&self, _method: &str, _operation: &str, _duration: Duration) {}

    /// `status` is `success` or `error`.
    fn inc_requests(&self, _method: &str, _operation: &str, _status: &str) {}

    /// `target` is the operation for handler errors and the path for
    /// routing and encoding errors.
    fn inc_errors(&self, _method: &str, _target: &str, _reason: &str) {}
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl MetricsSink for NoopSink {}

/// Sink that forwards to the global `metrics` recorder.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrometheusSink;

impl MetricsSink for PrometheusSink {
    fn inflight_inc(&self, operation: &str) {
        gauge!(INFLIGHT_REQUESTS, "operation" => operation.to_string()).increment(1.0);
    }

    fn inflight_dec(&self, operation: &str) {
        gauge!(INFLIGHT_REQUESTS, "operation" => operation.to_string()).decrement(1.0);
    }

    fn observe_request_size(&self, method: &str, operation: &str, bytes: usize) {
        histogram!(
            REQUEST_SIZE,
            "method" => method.to_string(),
            "operation" => operation.to_string()
        )
        .record(bytes as f64);
    }

    fn observe_response_size(&self, method: &str, operation: &str, bytes: usize) {
        histogram!(
            RESPONSE_SIZE,
            "method" => method.to_string(),
            "operation" => operation.to_string()
        )
        .record(bytes as f64);
    }

    fn observe_duration(&self, method: &str, operation: &str, duration: Duration) {
        histogram!(
            REQUEST_DURATION,
            "method" => method.to_string(),
            "operation" => operation.to_string()
        )
        .record(duration.as_secs_f64());
    }

    fn inc_requests(&self, method: &str, operation: &str, status: &str) {
        counter!(
            REQUESTS_TOTAL,
            "method" => method.to_string(),
            "operation" => operation.to_string(),
            "status" => status.to_string()
        )
        .increment(1);
    }

    fn inc_errors(&self, method: &str, target: &str, reason: &str) {
        counter!(
            ERRORS_TOTAL,
            "method" => method.to_string(),
            "path" => target.to_string(),
            "reason" => reason.to_string()
        )
        .increment(1);
    }
}

/// Install the Prometheus recorder and its scrape listener.
///
/// Failure is logged and leaves metrics disabled; it never stops the server.
pub fn init_metrics(addr: SocketAddr) {
    let builder = PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Full(REQUEST_DURATION.to_string()),
            DURATION_BUCKETS,
        )
        .and_then(|b| {
            b.set_buckets_for_metric(Matcher::Suffix("_size_bytes".to_string()), SIZE_BUCKETS)
        });

    let result = builder.and_then(|b| b.install());
    match result {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => {
            tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter")
        }
    }
}

/// Label tuple used as the key of [`MemorySink`] series.
pub type Labels = (String, String, String);

/// Running aggregate of one histogram series.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Summary {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
}

impl Summary {
    fn record(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// In-process sink keeping every series in concurrent maps.
///
/// Histograms are folded into a [`Summary`] per label set, so memory is
/// bounded by label cardinality, not by request count.
#[derive(Debug, Default)]
pub struct MemorySink {
    inflight: DashMap<String, i64>,
    requests: DashMap<Labels, u64>,
    errors: DashMap<Labels, u64>,
    request_sizes: DashMap<(String, String), Summary>,
    response_sizes: DashMap<(String, String), Summary>,
    durations: DashMap<(String, String), Summary>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inflight(&self, operation: &str) -> i64 {
        self.inflight.get(operation).map(|v| *v).unwrap_or(0)
    }

    pub fn requests(&self, method: &str, operation: &str, status: &str) -> u64 {
        self.requests
            .get(&key3(method, operation, status))
            .map(|v| *v)
            .unwrap_or(0)
    }

    pub fn errors(&self, method: &str, target: &str, reason: &str) -> u64 {
        self.errors
            .get(&key3(method, target, reason))
            .map(|v| *v)
            .unwrap_or(0)
    }

    /// Total error count across all label sets.
    pub fn total_errors(&self) -> u64 {
        self.errors.iter().map(|e| *e.value()).sum()
    }

    /// Request sizes in bytes.
    pub fn request_size(&self, method: &str, operation: &str) -> Summary {
        summary(&self.request_sizes, method, operation)
    }

    /// Response sizes in bytes.
    pub fn response_size(&self, method: &str, operation: &str) -> Summary {
        summary(&self.response_sizes, method, operation)
    }

    /// Handler latency in seconds.
    pub fn duration(&self, method: &str, operation: &str) -> Summary {
        summary(&self.durations, method, operation)
    }
}

impl MetricsSink for MemorySink {
    fn inflight_inc(&self, operation: &str) {
        *self.inflight.entry(operation.to_string()).or_insert(0) += 1;
    }

    fn inflight_dec(&self, operation: &str) {
        *self.inflight.entry(operation.to_string()).or_insert(0) -= 1;
    }

    fn observe_request_size(&self, method: &str, operation: &str, bytes: usize) {
        self.request_sizes
            .entry(key2(method, operation))
            .or_default()
            .record(bytes as f64);
    }

    fn observe_response_size(&self, method: &str, operation: &str, bytes: usize) {
        self.response_sizes
            .entry(key2(method, operation))
            .or_default()
            .record(bytes as f64);
    }

    fn observe_duration(&self, method: &str, operation: &str, duration: Duration) {
        self.durations
            .entry(key2(method, operation))
            .or_default()
            .record(duration.as_secs_f64());
    }

    fn inc_requests(&self, method: &str, operation: &str, status: &str) {
        *self.requests.entry(key3(method, operation, status)).or_insert(0) += 1;
    }

    fn inc_errors(&self, method: &str, target: &str, reason: &str) {
        *self.errors.entry(key3(method, target, reason)).or_insert(0) += 1;
    }
}

fn summary(series: &DashMap<(String, String), Summary>, method: &str, operation: &str) -> Summary {
    series
        .get(&key2(method, operation))
        .map(|v| *v)
        .unwrap_or_default()
}

fn key2(a: &str, b: &str) -> (String, String) {
    (a.to_string(), b.to_string())
}

fn key3(a: &str, b: &str, c: &str) -> Labels {
    (a.to_string(), b.to_string(), c.to_string())
}
