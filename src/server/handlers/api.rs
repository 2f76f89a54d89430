//! Liveness endpoints.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

use super::super::AppState;
use crate::pipeline::HealthStatus;

/// Welcome message at the root.
pub async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "message": "Welcome to the OCR extraction API",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Health check endpoint for container orchestration. No side effects.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.pipeline.health();
    let status = match report.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(report))
}
