//! Liveness and readiness endpoints

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use std::time::Instant;

use crate::db::Repository;

#[derive(Serialize)]
pub struct HealthStatus {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

/// Liveness probe; answers as long as the process is up
pub async fn health_check() -> impl IntoResponse {
    Json(HealthStatus {
        status: "ok",
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
pub struct ReadinessStatus {
    status: &'static str,
    database: CheckResult,
}

#[derive(Serialize)]
pub struct CheckResult {
    ok: bool,
    latency_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Readiness probe; pings the database and reports the latency
pub async fn readiness_check(State(repo): State<Repository>) -> impl IntoResponse {
    let started = Instant::now();
    let (ok, error) = match repo.ping().await {
        Ok(()) => (true, None),
        Err(err) => (false, Some(err.to_string())),
    };
    let database = CheckResult {
        ok,
        latency_ms: started.elapsed().as_millis(),
        error,
    };

    let status_code = if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let status = if ok { "ready" } else { "degraded" };

    (status_code, Json(ReadinessStatus { status, database }))
}
