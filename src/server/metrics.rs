use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all hitlab metrics
const PREFIX: &str = "hitlab";

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
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Studio Metrics
    pub static ref PREDICTIONS_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_predictions_total"),
        "Total number of scored feature sets"
    ).expect("Failed to create predictions_total metric");

    pub static ref GENERATIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_generations_total"), "Total number of generated profiles"),
        &["mode"]
    ).expect("Failed to create generations_total metric");

    // External Service Metrics
    pub static ref EXTERNAL_CALLS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            format!("{PREFIX}_external_calls_total"),
            "External service call attempts by outcome"
        ),
        &["service", "outcome"]
    ).expect("Failed to create external_calls_total metric");

    pub static ref PROCESS_MEMORY_BYTES: Gauge = Gauge::new(
        format!("{PREFIX}_process_memory_bytes"),
        "Process memory usage in bytes"
    ).expect("Failed to create process_memory_bytes metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Already registered is fine (tests call this repeatedly)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(PREDICTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(GENERATIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(EXTERNAL_CALLS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(PROCESS_MEMORY_BYTES.clone()));

    tracing::info!("Metrics system initialized successfully");
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

pub fn record_prediction() {
    PREDICTIONS_TOTAL.inc();
}

pub fn record_generation(explore: bool) {
    let mode = if explore { "explore" } else { "market" };
    GENERATIONS_TOTAL.with_label_values(&[mode]).inc();
}

/// Record one attempt against an external service.
/// `outcome` is one of "ok", "retry", "error".
pub fn record_external_call(service: &str, outcome: &str) {
    EXTERNAL_CALLS_TOTAL
        .with_label_values(&[service, outcome])
        .inc();
}

/// Update process memory usage
pub fn update_memory_usage() {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let rss_kb = status
                .lines()
                .find(|line| line.starts_with("VmRSS:"))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<f64>().ok());
            if let Some(kb) = rss_kb {
                PROCESS_MEMORY_BYTES.set(kb * 1024.0);
            }
        }
    }
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    update_memory_usage();

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

#[cfg(test)]
mod tests {
    use super::*;

    fn has_metric(name: &str) -> bool {
        REGISTRY.gather().iter().any(|m| m.get_name() == name)
    }

    #[test]
    fn test_metrics_initialization() {
        init_metrics();
        init_metrics();

        let metric_families = REGISTRY.gather();
        assert!(!metric_families.is_empty(), "Metrics should be registered");
    }

    #[test]
    fn test_record_http_request() {
        init_metrics();

        record_http_request("POST", "/v1/predict", 200, Duration::from_millis(5));

        assert!(has_metric("hitlab_http_requests_total"));
        assert!(has_metric("hitlab_http_request_duration_seconds"));
    }

    #[test]
    fn test_record_studio_and_external_calls() {
        init_metrics();

        record_prediction();
        record_generation(true);
        record_external_call("advisor", "retry");
        record_external_call("advisor", "ok");

        assert!(PREDICTIONS_TOTAL.get() >= 1.0);
        assert!(
            EXTERNAL_CALLS_TOTAL
                .with_label_values(&["advisor", "retry"])
                .get()
                >= 1.0
        );
        assert!(has_metric("hitlab_generations_total"));
    }
}
