//! Prometheus metrics for yt-dlp orchestration
//!
//! All metrics live in the default registry so the web layer can expose
//! them with `prometheus::gather()`.

// Registration only fails on a duplicate metric name.
#![allow(clippy::expect_used)]

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_counter, register_int_gauge, CounterVec, HistogramVec,
    IntCounter, IntGauge,
};

/// yt-dlp command execution duration
/// Labels: operation (metadata/stream)
pub static YTDLP_EXECUTION_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "tubeway_ytdlp_execution_duration_seconds",
        "Time spent executing yt-dlp commands",
        &["operation"],
        vec![0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 240.0, 600.0, 1800.0]
    )
    .expect("metric can be registered")
});

/// Metadata fetches by outcome
/// Labels: outcome (success/<error category>)
pub static METADATA_REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tubeway_metadata_requests_total",
        "Total number of metadata fetches by outcome",
        &["outcome"]
    )
    .expect("metric can be registered")
});

/// Media streams by outcome
/// Labels: outcome (completed/client_disconnected/<error category>)
pub static STREAM_OUTCOMES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tubeway_stream_outcomes_total",
        "Total number of media streams by outcome",
        &["outcome"]
    )
    .expect("metric can be registered")
});

/// Bytes relayed from yt-dlp to clients
pub static STREAM_BYTES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("tubeway_stream_bytes_total", "Total bytes relayed to clients")
        .expect("metric can be registered")
});

/// yt-dlp subprocesses currently alive
pub static ACTIVE_PROCESSES: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("tubeway_active_processes", "Number of running yt-dlp subprocesses")
        .expect("metric can be registered")
});

/// Errors by category and operation
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tubeway_errors_total",
        "Total number of errors by category and operation",
        &["category", "operation"]
    )
    .expect("metric can be registered")
});

/// Record an error for the given operation
pub fn record_error(category: &str, operation: &str) {
    ERRORS_TOTAL.with_label_values(&[category, operation]).inc();
}

/// Record the outcome of a metadata fetch
pub fn record_metadata_outcome(outcome: &str, elapsed_secs: f64) {
    METADATA_REQUESTS_TOTAL.with_label_values(&[outcome]).inc();
    YTDLP_EXECUTION_DURATION_SECONDS
        .with_label_values(&["metadata"])
        .observe(elapsed_secs);
}

/// Record the outcome of a media stream
pub fn record_stream_outcome(outcome: &str, elapsed_secs: f64) {
    STREAM_OUTCOMES_TOTAL.with_label_values(&[outcome]).inc();
    YTDLP_EXECUTION_DURATION_SECONDS
        .with_label_values(&["stream"])
        .observe(elapsed_secs);
}
