//! Metrics and observability utilities
//!
//! Provides Prometheus metrics with SLO-aligned histograms
//! and standardized naming conventions.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

/// Metrics prefix for all RegForge metrics
pub const METRICS_PREFIX: &str = "regforge";

/// Histogram buckets for request latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
];

/// Buckets for completion/generation latency (model calls are slow)
pub const GENERATION_BUCKETS: &[f64] = &[
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.000,  // 2s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
    60.00,  // 60s
];

/// Install the Prometheus recorder and return the render handle
pub fn setup_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_generation_duration_seconds", METRICS_PREFIX)),
            GENERATION_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            LATENCY_BUCKETS,
        )?
        .install_recorder()
}

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_ask_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total ask requests by terminal outcome"
    );

    describe_histogram!(
        format!("{}_ask_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end ask pipeline latency in seconds"
    );

    describe_histogram!(
        format!("{}_embedding_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Query embedding latency in seconds"
    );

    describe_histogram!(
        format!("{}_retrieval_candidates", METRICS_PREFIX),
        Unit::Count,
        "Candidate passages returned per retrieval"
    );

    describe_histogram!(
        format!("{}_slab_row_matches", METRICS_PREFIX),
        Unit::Count,
        "Structured table rows matched per request"
    );

    describe_counter!(
        format!("{}_generation_attempts_total", METRICS_PREFIX),
        Unit::Count,
        "Generation attempts by verification result"
    );

    describe_histogram!(
        format!("{}_generation_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Single generation attempt latency in seconds"
    );

    tracing::info!("Metrics registered");
}

/// Record a completed ask request with its terminal outcome
pub fn record_ask(duration_secs: f64, outcome: &'static str) {
    counter!(
        format!("{}_ask_requests_total", METRICS_PREFIX),
        "outcome" => outcome
    )
    .increment(1);

    histogram!(format!("{}_ask_duration_seconds", METRICS_PREFIX)).record(duration_secs);
}

/// Record query embedding latency
pub fn record_embedding(duration_secs: f64) {
    histogram!(format!("{}_embedding_duration_seconds", METRICS_PREFIX)).record(duration_secs);
}

/// Record how many candidate passages a retrieval returned
pub fn record_retrieval(candidates: usize) {
    histogram!(format!("{}_retrieval_candidates", METRICS_PREFIX)).record(candidates as f64);
}

/// Record how many structured table rows matched the question
pub fn record_slab_matches(rows: usize) {
    histogram!(format!("{}_slab_row_matches", METRICS_PREFIX)).record(rows as f64);
}

/// Record a single generation attempt
pub fn record_generation(duration_secs: f64, verified: bool) {
    let result = if verified { "verified" } else { "failed" };

    counter!(
        format!("{}_generation_attempts_total", METRICS_PREFIX),
        "result" => result
    )
    .increment(1);

    histogram!(format!("{}_generation_duration_seconds", METRICS_PREFIX)).record(duration_secs);
}
