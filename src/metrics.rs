use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

pub const BACKEND_HEALTH_STATUS: &str = "backend_health_status";

pub const REQUESTS_TOTAL: &str = "http_requests_total";
pub const REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
pub const REQUEST_SIZE_BYTES: &str = "http_request_size_bytes";
pub const RESPONSE_SIZE_BYTES: &str = "http_response_size_bytes";

pub const BACKEND_REQUESTS_TOTAL: &str = "backend_requests_total";
pub const BACKEND_REQUEST_DURATION_SECONDS: &str = "backend_response_time_seconds";

/// Tracks the last-reported health value per backend so the Prometheus
/// text-exposition handler can list every known series even if the metrics
/// crate's own registry hasn't flushed them yet.
pub static BACKEND_HEALTH_GAUGES: Lazy<Mutex<HashMap<String, f64>>> = Lazy::new(|| {
    describe_gauge!(
        BACKEND_HEALTH_STATUS,
        "Health status of individual backends (1 for healthy, 0 for unhealthy)"
    );
    describe_counter!(
        REQUESTS_TOTAL,
        Unit::Count,
        "Total number of HTTP requests processed by the proxy, labeled by method, status and backend."
    );
    describe_histogram!(
        REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "End-to-end latency of requests processed by the proxy."
    );
    describe_histogram!(
        REQUEST_SIZE_BYTES,
        Unit::Bytes,
        "Size of inbound request bodies."
    );
    describe_histogram!(
        RESPONSE_SIZE_BYTES,
        Unit::Bytes,
        "Size of outbound response bodies."
    );
    describe_counter!(
        BACKEND_REQUESTS_TOTAL,
        Unit::Count,
        "Total number of requests forwarded to backend targets, labeled by outcome."
    );
    describe_histogram!(
        BACKEND_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of requests forwarded to backend targets."
    );
    Mutex::new(HashMap::new())
});

/// Ensures the static metric descriptions above have registered even if no
/// request has flowed yet (so `/metrics` is non-empty immediately at boot).
pub fn init() {
    Lazy::force(&BACKEND_HEALTH_GAUGES);
}

pub fn set_backend_health_status(backend_id: &str, is_healthy: bool) {
    let value = if is_healthy { 1.0 } else { 0.0 };
    BACKEND_HEALTH_GAUGES
        .lock()
        .unwrap()
        .insert(backend_id.to_string(), value);
    gauge!(BACKEND_HEALTH_STATUS, "backend" => backend_id.to_string()).set(value);
}

pub fn increment_requests_total(method: &str, status_code: u16, backend: &str) {
    counter!(
        REQUESTS_TOTAL,
        "method" => method.to_string(),
        "status_code" => status_code.to_string(),
        "backend" => backend.to_string()
    )
    .increment(1);
}

pub fn record_request_duration(method: &str, backend: &str, duration: std::time::Duration) {
    histogram!(
        REQUEST_DURATION_SECONDS,
        "method" => method.to_string(),
        "backend" => backend.to_string()
    )
    .record(duration.as_secs_f64());
}

pub fn record_request_size(backend: &str, bytes: u64) {
    histogram!(REQUEST_SIZE_BYTES, "backend" => backend.to_string()).record(bytes as f64);
}

pub fn record_response_size(backend: &str, bytes: u64) {
    histogram!(RESPONSE_SIZE_BYTES, "backend" => backend.to_string()).record(bytes as f64);
}

pub fn increment_backend_requests_total(backend: &str, status: &str) {
    counter!(
        BACKEND_REQUESTS_TOTAL,
        "backend" => backend.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_backend_request_duration(backend: &str, duration: std::time::Duration) {
    histogram!(BACKEND_REQUEST_DURATION_SECONDS, "backend" => backend.to_string())
        .record(duration.as_secs_f64());
}

/// RAII timer recording `backend_response_time_seconds` and the
/// success/error counter on drop, so every early return in the request
/// handler still reports a sample.
pub struct BackendRequestTimer {
    start: Instant,
    backend: String,
    outcome: &'static str,
}

impl BackendRequestTimer {
    pub fn new(backend: String) -> Self {
        Self {
            start: Instant::now(),
            backend,
            outcome: "success",
        }
    }

    pub fn mark_failure(&mut self) {
        self.outcome = "error";
    }
}

impl Drop for BackendRequestTimer {
    fn drop(&mut self) {
        record_backend_request_duration(&self.backend, self.start.elapsed());
        increment_backend_requests_total(&self.backend, self.outcome);
    }
}
