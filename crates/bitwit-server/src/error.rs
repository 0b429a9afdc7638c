//! HTTP error mapping for the control API.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bitwit_core::{Error, SettingIssue};
use serde::Serialize;
use tracing::error;

/// Core error surfaced by a handler
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    status: &'static str,
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Vec<SettingIssue>>,
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, &'static str) {
        match &self.0 {
            Error::InvalidArgument(_) => (StatusCode::BAD_REQUEST, "error", "INVALID_ARGUMENT"),
            Error::ValidationFailed(_) => (StatusCode::BAD_REQUEST, "error", "VALIDATION_FAILED"),
            Error::AlreadyRunning { .. } => (StatusCode::CONFLICT, "busy", "ALREADY_RUNNING"),
            Error::TransientIo { .. } => (StatusCode::SERVICE_UNAVAILABLE, "error", "TRANSIENT_IO"),
            Error::PipelineFailure(_) => (StatusCode::INTERNAL_SERVER_ERROR, "error", "PIPELINE_FAILURE"),
            Error::Io(_) | Error::Serialization(_) | Error::LockPoisoned => {
                (StatusCode::INTERNAL_SERVER_ERROR, "error", "INTERNAL")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, label, code) = self.parts();
        if status.is_server_error() {
            error!(error = %self.0, code, "Request failed");
        }

        let details = match &self.0 {
            Error::ValidationFailed(issues) => Some(issues.clone()),
            _ => None,
        };
        let body = Json(ErrorResponse {
            status: label,
            code,
            message: self.0.to_string(),
            details,
        });

        (status, body).into_response()
    }
}
