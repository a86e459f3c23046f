use axum::{Json, extract::State, response::IntoResponse};
use host_bridge::ConnectionInfo;
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub clients: usize,
    pub pending_calls: usize,
    pub connections: Vec<ConnectionInfo>,
}

/// Health check endpoint - reports whether any embedded client is connected
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let connections = state.bridge.registry().snapshot().await;
    let status = if connections.is_empty() {
        "waiting_for_client"
    } else {
        "connected"
    };

    Json(HealthStatus {
        status: status.to_string(),
        clients: connections.len(),
        pending_calls: state.bridge.pending_count(),
        connections,
    })
}
