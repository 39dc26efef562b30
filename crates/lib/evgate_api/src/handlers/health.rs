//! Liveness endpoint.

use axum::Json;

use crate::models::HealthResponse;

/// `GET /` and `GET /health`.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        message: "evgate API gateway is running".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}
