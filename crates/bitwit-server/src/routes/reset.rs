//! Application reset route.

use axum::{extract::State, routing::post, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::error::ApiError;
use crate::state::AppState;

/// Create reset router
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/reset_app", post(reset_app))
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub status: &'static str,
    pub message: String,
    /// Whether a running batch was abandoned
    pub abandoned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_log: Option<String>,
}

/// Abandon any running batch and rotate the run log
pub async fn reset_app(State(state): State<Arc<AppState>>) -> Result<Json<ResetResponse>, ApiError> {
    let abandoned = state.orchestrator.reset();
    let archived = state.log.rotate(&state.config.archive_dir)?;
    info!(abandoned, archived = ?archived, "Application reset");

    let message = if abandoned {
        "Application reset. The running batch was abandoned.".to_string()
    } else {
        "Application reset.".to_string()
    };

    Ok(Json(ResetResponse {
        status: "success",
        message,
        abandoned,
        archived_log: archived.map(|p| p.display().to_string()),
    }))
}
