//! Request counters and latency for store calls.

use metrics::{counter, histogram};

pub mod names {
    /// Labelled by `operation` and HTTP `status`.
    pub const REQUESTS_TOTAL: &str = "store_requests_total";
    pub const RETRIES_TOTAL: &str = "store_retries_total";
    pub const LATENCY_SECONDS: &str = "store_latency_seconds";
}

/// Count one finished call and observe how long it took, retries included.
pub fn record_request(operation: &str, status: u16, latency_ms: f64) {
    let operation = operation.to_owned();
    counter!(names::REQUESTS_TOTAL, "operation" => operation.clone(), "status" => status.to_string())
        .increment(1);
    histogram!(names::LATENCY_SECONDS, "operation" => operation).record(latency_ms / 1000.0);
}

pub fn record_retry(operation: &str) {
    counter!(names::RETRIES_TOTAL, "operation" => operation.to_owned()).increment(1);
}
