use axum::{routing::get, Router};
use std::sync::Arc;

use crate::handlers::{diagnostics, health_check, ready_check};
use crate::services::room_service::RoomRegistry;

/// Create API routes
pub fn create_api_routes() -> Router<Arc<RoomRegistry>> {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .route("/v1/diagnostics", get(diagnostics))
}
