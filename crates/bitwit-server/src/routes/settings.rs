//! Runtime settings routes.

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::{get, post},
    Json, Router,
};
use bitwit_core::{Error, Settings, SettingsPatch};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::state::AppState;

/// Create settings router
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/get_config", get(get_config))
        .route("/update_config", post(update_config))
}

#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    pub status: &'static str,
    pub config: Settings,
}

#[derive(Debug, Serialize)]
pub struct UpdateConfigResponse {
    pub status: &'static str,
    pub message: String,
    pub updated_config: Settings,
}

/// Current settings snapshot
pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<ConfigResponse> {
    Json(ConfigResponse {
        status: "success",
        config: (*state.settings.get()).clone(),
    })
}

/// Apply a partial settings update, all or nothing
pub async fn update_config(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SettingsPatch>, JsonRejection>,
) -> Result<Json<UpdateConfigResponse>, ApiError> {
    let Json(patch) = payload.map_err(|e| {
        Error::invalid_argument(format!("expected a JSON object of settings: {}", e.body_text()))
    })?;
    let count = patch.len();
    let level_changed = patch.contains_key("LOG_LEVEL");

    let updated = state.settings.replace(patch)?;
    info!(count, "Settings updated via API");

    if level_changed
        && let Some(level) = updated.text("LOG_LEVEL")
        && let Err(e) = state.log_level.apply(level)
    {
        warn!(error = %e, "Failed to apply LOG_LEVEL");
    }

    Ok(Json(UpdateConfigResponse {
        status: "success",
        message: format!("Configuration updated ({} setting(s)).", count),
        updated_config: (*updated).clone(),
    }))
}
