//! Run log routes.

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    routing::get,
    Json, Router,
};
use bitwit_core::runlog::clamp_tail_lines;
use bitwit_core::Error;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::ApiError;
use crate::state::AppState;

/// Create log router
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/get_logs", get(get_logs))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub lines: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub status: &'static str,
    pub logs: Vec<String>,
}

/// Most recent run log lines, oldest first
pub async fn get_logs(
    State(state): State<Arc<AppState>>,
    query: Result<Query<LogsQuery>, QueryRejection>,
) -> Result<Json<LogsResponse>, ApiError> {
    let Query(query) = query
        .map_err(|e| Error::invalid_argument(format!("invalid lines parameter: {}", e.body_text())))?;

    Ok(Json(LogsResponse {
        status: "success",
        logs: state.log.tail(clamp_tail_lines(query.lines)),
    }))
}
