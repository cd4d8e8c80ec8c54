//! Liveness/readiness probe.

use axum::Json;
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// GET /actuator/health — returns service health.
pub async fn check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "UP" })
}
