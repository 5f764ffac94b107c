use axum::Json;
use tracing::debug;

use crate::models::HealthResponse;

const SERVICE_NAME: &str = "colabri-relay";

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    debug!("Health check requested");
    Json(HealthResponse {
        status: "ok".to_string(),
        service: SERVICE_NAME.to_string(),
        message: "Relay is running".to_string(),
    })
}

/// Readiness check endpoint. Rooms live in memory, so running means ready.
pub async fn ready_check() -> Json<HealthResponse> {
    debug!("Readiness check requested");
    Json(HealthResponse {
        status: "ok".to_string(),
        service: SERVICE_NAME.to_string(),
        message: "Relay is ready".to_string(),
    })
}
