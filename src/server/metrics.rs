use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;
use tracing::info;

/// Metric name prefix for all tunefetch metrics
const PREFIX: &str = "tunefetch";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Job Metrics
    pub static ref JOBS_SUBMITTED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_jobs_submitted_total"), "Jobs accepted by the queue"),
        &["kind"]
    ).expect("Failed to create jobs_submitted_total metric");

    pub static ref JOBS_FINISHED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_jobs_finished_total"), "Jobs that reached a terminal status"),
        &["kind", "status"]
    ).expect("Failed to create jobs_finished_total metric");

    pub static ref JOB_RETRIES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_job_retries_total"), "Job executions rescheduled after a failure"),
        &["kind"]
    ).expect("Failed to create job_retries_total metric");

    pub static ref JOB_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_job_duration_seconds"),
            "Duration of the last execution of finished jobs"
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]),
        &["kind"]
    ).expect("Failed to create job_duration_seconds metric");

    // Catalog Metrics
    pub static ref CATALOG_CONTENTION_RETRIES_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_catalog_contention_retries_total"),
        "Catalog writes retried because the database was busy"
    ).expect("Failed to create catalog_contention_retries_total metric");

    // Live Update Metrics
    pub static ref LIVE_STREAMS: Gauge = Gauge::new(
        format!("{PREFIX}_live_streams"),
        "Number of connected live update streams"
    ).expect("Failed to create live_streams metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(JOBS_SUBMITTED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(JOBS_FINISHED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(JOB_RETRIES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(JOB_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(CATALOG_CONTENTION_RETRIES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(LIVE_STREAMS.clone()));

    info!("Metrics system initialized successfully");
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration.as_secs_f64());
}

pub fn record_job_submitted(kind: &str) {
    JOBS_SUBMITTED_TOTAL.with_label_values(&[kind]).inc();
}

pub fn record_job_finished(kind: &str, status: &str) {
    JOBS_FINISHED_TOTAL.with_label_values(&[kind, status]).inc();
}

pub fn record_job_retry(kind: &str) {
    JOB_RETRIES_TOTAL.with_label_values(&[kind]).inc();
}

pub fn observe_job_duration(kind: &str, seconds: f64) {
    JOB_DURATION_SECONDS.with_label_values(&[kind]).observe(seconds);
}

pub fn record_catalog_contention_retry() {
    CATALOG_CONTENTION_RETRIES_TOTAL.inc();
}

pub fn set_live_streams(count: usize) {
    LIVE_STREAMS.set(count as f64);
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_default();
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}

/// Serves `/metrics` on its own port, for Prometheus scraping.
pub async fn run_metrics_server(port: u16) -> anyhow::Result<()> {
    let app = Router::new().route("/metrics", get(metrics_handler));
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("Metrics available at port {}", port);
    axum::serve(listener, app).await?;
    Ok(())
}
