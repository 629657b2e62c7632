//! Prometheus metrics for ingestion-service.

use axum::{extract::Request, middleware::Next, response::Response};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};
use std::time::Instant;

/// Counter for HTTP requests by method and status.
pub static HTTP_REQUESTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ingestion_http_requests_total",
        "Total number of HTTP requests",
        &["method", "status"]
    )
    .expect("Failed to register HTTP_REQUESTS")
});

/// Histogram for HTTP request duration by method.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "ingestion_http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .expect("Failed to register HTTP_REQUEST_DURATION")
});

/// Histogram for database query duration.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "ingestion_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Counter for statement uploads by detected format and outcome.
pub static STATEMENT_UPLOADS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ingestion_statement_uploads_total",
        "Total number of statement uploads",
        &["format", "status"]
    )
    .expect("Failed to register STATEMENT_UPLOADS")
});

/// Counter for reconciled rows by outcome (created, updated, skipped).
pub static RECONCILED_ROWS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ingestion_reconciled_rows_total",
        "Total number of reconciled statement rows",
        &["outcome"]
    )
    .expect("Failed to register RECONCILED_ROWS")
});

/// Counter for errors.
pub static ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ingestion_errors_total",
        "Total number of errors",
        &["error_type"]
    )
    .expect("Failed to register ERRORS")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&HTTP_REQUESTS);
    Lazy::force(&HTTP_REQUEST_DURATION);
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&STATEMENT_UPLOADS);
    Lazy::force(&RECONCILED_ROWS);
    Lazy::force(&ERRORS);
}

/// Get all metrics as Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, status: &str, duration_secs: f64) {
    HTTP_REQUESTS.with_label_values(&[method, status]).inc();
    HTTP_REQUEST_DURATION
        .with_label_values(&[method])
        .observe(duration_secs);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    ERRORS.with_label_values(&[error_type]).inc();
}

/// Record a finished upload.
pub fn record_statement_upload(format: &str, status: &str) {
    STATEMENT_UPLOADS.with_label_values(&[format, status]).inc();
}

/// Record reconciled rows for one outcome.
pub fn record_reconciled_rows(outcome: &str, count: usize) {
    RECONCILED_ROWS
        .with_label_values(&[outcome])
        .inc_by(count as f64);
}

/// Axum middleware feeding the HTTP request metrics.
pub async fn http_metrics_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();

    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    record_http_request(&method, &status, start.elapsed().as_secs_f64());

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposition_contains_registered_families() {
        init_metrics();
        record_statement_upload("delimited", "completed");
        record_reconciled_rows("created", 2);

        let text = get_metrics();
        assert!(text.contains("ingestion_statement_uploads_total"));
        assert!(text.contains("ingestion_reconciled_rows_total"));
    }
}
