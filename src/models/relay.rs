use serde::{Deserialize, Serialize};

/// Body of the relay's health and readiness endpoints
#[derive(Serialize, Deserialize, Debug)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub message: String,
}

/// Snapshot of the relay's room registry and host resources
#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsResponse {
    pub n_conn: u32,
    pub n_rooms: u32,
    pub n_persistent_rooms: u32,
    pub n_ephemeral_rooms: u32,
    pub n_subscriptions: u32,
    pub cpu_usage: f32,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
}
