//! Batch run routes.

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use bitwit_core::{BatchStatus, Error};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// Create run router
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/run_bitwit", post(run_bitwit))
        .route("/run_status", get(run_status))
}

#[derive(Debug, Deserialize)]
pub struct RunRequest {
    #[serde(default = "default_count")]
    pub count: i64,
}

fn default_count() -> i64 {
    1
}

#[derive(Debug, Serialize)]
pub struct RunAccepted {
    pub status: &'static str,
    pub message: String,
    pub batch_id: Uuid,
    pub total: u32,
}

/// Start a batch in the background
///
/// An empty body starts a single run.
pub async fn run_bitwit(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<RunAccepted>), ApiError> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        RunRequest {
            count: default_count(),
        }
    } else {
        serde_json::from_slice::<RunRequest>(&body)
            .map_err(|e| Error::invalid_argument(format!("invalid run request: {}", e)))?
    };

    let ticket = state.orchestrator.start_batch(request.count)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(RunAccepted {
            status: "success",
            message: format!("Started {} BitWit run(s) in background.", ticket.total),
            batch_id: ticket.batch_id,
            total: ticket.total,
        }),
    ))
}

/// Structured batch progress
pub async fn run_status(State(state): State<Arc<AppState>>) -> Json<BatchStatus> {
    Json(state.orchestrator.status())
}
