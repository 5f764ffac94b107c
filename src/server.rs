use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::routes::create_api_routes;
use crate::services::room_service::RoomRegistry;
use crate::websocket::websocket_handler;

/// Relay router: the collaboration socket at `/ws`, HTTP endpoints under `/api`
pub fn app(registry: Arc<RoomRegistry>) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .nest("/api", create_api_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(registry)
}

/// Serve the relay on an already bound listener until the process ends
pub async fn serve(listener: TcpListener, registry: Arc<RoomRegistry>) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Relay listening on ws://{}/ws", addr);
    }
    axum::serve(listener, app(registry)).await
}
