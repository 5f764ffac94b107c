use axum::{extract::State, Json};
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock};
use sysinfo::System;
use tracing::info;

use crate::models::DiagnosticsResponse;
use crate::services::room_service::RoomRegistry;

static SYSTEM_MONITOR: OnceLock<Mutex<System>> = OnceLock::new();

/// Room registry and host statistics
pub async fn diagnostics(State(registry): State<Arc<RoomRegistry>>) -> Json<DiagnosticsResponse> {
    let stats = registry.stats();

    let (cpu_usage, memory_used, memory_total) = {
        let mut sys = SYSTEM_MONITOR.get_or_init(|| Mutex::new(System::new_all())).lock();
        sys.refresh_cpu();
        sys.refresh_memory();
        (sys.global_cpu_info().cpu_usage(), sys.used_memory(), sys.total_memory())
    };

    info!(
        "Diagnostics: CPU: {:.2}%, Mem: {}/{} MB, Rooms: {} ({} persistent, {} ephemeral), Subscriptions: {}",
        cpu_usage,
        memory_used / 1024 / 1024,
        memory_total / 1024 / 1024,
        stats.rooms,
        stats.persistent_rooms,
        stats.ephemeral_rooms,
        stats.subscriptions
    );

    Json(DiagnosticsResponse {
        n_conn: stats.connections,
        n_rooms: stats.rooms,
        n_persistent_rooms: stats.persistent_rooms,
        n_ephemeral_rooms: stats.ephemeral_rooms,
        n_subscriptions: stats.subscriptions,
        cpu_usage,
        memory_used_mb: memory_used / 1024 / 1024,
        memory_total_mb: memory_total / 1024 / 1024,
    })
}
