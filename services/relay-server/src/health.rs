//! Health check endpoint for monitoring — a read-only view over the
//! Registry's connection counts.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use relay_core::RelayCore;
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    connections: ConnectionCounts,
}

#[derive(Serialize)]
struct ConnectionCounts {
    devices: usize,
    clients: usize,
}

pub async fn health_check(State(core): State<Arc<RelayCore>>) -> Json<HealthResponse> {
    let (devices, clients) = core.registry.connection_counts().await;
    Json(HealthResponse {
        status: "healthy",
        connections: ConnectionCounts { devices, clients },
    })
}
