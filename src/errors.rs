//! HTTP-facing errors.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::core::scheduling::SchedulingError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Google Calendar is not configured")]
    CalendarNotConfigured,

    #[error("Missing query parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Calendar authorization failed: {0}")]
    Authorization(#[from] SchedulingError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::CalendarNotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            AppError::MissingParameter(_) => StatusCode::BAD_REQUEST,
            AppError::Authorization(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            warn!("Request rejected: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
