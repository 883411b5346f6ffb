pub mod ask;
pub mod health;

use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use std::time::Duration;
use tower::limit::ConcurrencyLimitLayer;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::db::Repository;
use crate::middleware as app_middleware;
use crate::services::AppState;

/// Maximum concurrent requests (backpressure control)
const MAX_CONCURRENT_REQUESTS: usize = 100;

/// Request timeout in seconds; bounds time-to-response, not the SSE
/// body that follows
const REQUEST_TIMEOUT_SECS: u64 = 30;

pub fn create_router(state: AppState, repo: Repository, metrics: PrometheusHandle) -> Router {
    // Health routes carry the repository directly
    let health_routes = Router::new()
        .route("/health", get(health::health_check))
        .route("/readiness", get(health::readiness_check))
        .with_state(repo);

    let api_routes = Router::new()
        .route("/api/ask", post(ask::ask_question))
        .route("/api/ask/stream", post(ask::ask_question_stream))
        .with_state(state);

    let metrics_routes = Router::new().route(
        "/metrics",
        get(move || std::future::ready(metrics.render())),
    );

    // Build the router with middleware stack
    Router::new()
        .merge(api_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(
            ServiceBuilder::new()
                // Trace spans (outermost - captures all requests)
                .layer(TraceLayer::new_for_http())
                // Request timeout
                .layer(TimeoutLayer::new(Duration::from_secs(REQUEST_TIMEOUT_SECS)))
                // Concurrency limit for backpressure
                .layer(ConcurrencyLimitLayer::new(MAX_CONCURRENT_REQUESTS))
                // Request ID propagation
                .layer(axum::middleware::from_fn(app_middleware::request_id))
                // Content-Length limit
                .layer(axum::middleware::from_fn(app_middleware::content_length_limit))
                // Browser clients (the dashboard) call from another origin
                .layer(CorsLayer::permissive()),
        )
}
