//! Health check endpoint.

use axum::{extract::State, Json};
use bitwit_core::BatchState;
use serde::Serialize;
use std::sync::Arc;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub orchestrator: BatchState,
    pub metrics: HealthMetrics,
}

#[derive(Serialize)]
pub struct HealthMetrics {
    pub log_lines: usize,
    pub pending_requests: usize,
}

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthStatus> {
    let pending_requests = state
        .active_requests
        .load(std::sync::atomic::Ordering::SeqCst);

    Json(HealthStatus {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        orchestrator: state.orchestrator.status().state,
        metrics: HealthMetrics {
            log_lines: state.log.len(),
            pending_requests,
        },
    })
}
