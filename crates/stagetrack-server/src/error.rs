//! HTTP error mapping.
//!
//! Every handler returns `Result<_, AppError>`; the error body is always
//! `{"message": "<short description>"}` with the status taken from the
//! core error kind.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use stagetrack_core::TrackError;
use tracing::error;

pub struct AppError(pub TrackError);

impl From<TrackError> for AppError {
    fn from(err: TrackError) -> Self {
        Self(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        }
        let message = if status.is_server_error() {
            // Internal details stay in the logs.
            "internal server error".to_string()
        } else {
            self.0.to_string()
        };
        (status, Json(json!({ "message": message }))).into_response()
    }
}
