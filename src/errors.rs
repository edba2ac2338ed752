use crate::services::{database_sink::DatabaseError, pipeline::PipelineError};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use tracing::warn;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        match &err {
            PipelineError::InputTooLarge { .. } | PipelineError::ContentTooLarge { .. } => {
                AppError::new(StatusCode::PAYLOAD_TOO_LARGE, err.to_string())
            }
            PipelineError::InvalidFilename(_) => AppError::bad_request(err.to_string()),
            PipelineError::GenerationTimeout(_) => {
                AppError::new(StatusCode::GATEWAY_TIMEOUT, err.to_string())
            }
            // Generator diagnostics pass through unchanged.
            PipelineError::GenerationFailure(_) | PipelineError::DualWrite(_) => {
                AppError::internal(err.to_string())
            }
            PipelineError::PermissionDenied(_) => {
                masked(StatusCode::FORBIDDEN, "output directory is not writable", &err)
            }
            PipelineError::DatabaseWrite(db) => {
                let message = match db {
                    DatabaseError::DuplicateFilename(_) => err.to_string(),
                    DatabaseError::PoolExhausted => {
                        "database write failed: no connection available".to_string()
                    }
                    _ => "database write failed".to_string(),
                };
                masked(StatusCode::INTERNAL_SERVER_ERROR, message, &err)
            }
            PipelineError::Staging(_) => masked(
                StatusCode::INTERNAL_SERVER_ERROR,
                "staging area unavailable",
                &err,
            ),
            PipelineError::Io(_) => {
                masked(StatusCode::INTERNAL_SERVER_ERROR, "internal I/O error", &err)
            }
        }
    }
}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound(_) => AppError::not_found(err.to_string()),
            DatabaseError::ContentTooLarge { .. } => {
                AppError::new(StatusCode::PAYLOAD_TOO_LARGE, err.to_string())
            }
            DatabaseError::PoolExhausted => AppError::internal(err.to_string()),
            other => masked(StatusCode::INTERNAL_SERVER_ERROR, "database error", &other),
        }
    }
}

/// Replace an error's text with a fixed client message; the detail goes to the log.
fn masked(status: StatusCode, message: impl Into<String>, detail: &dyn fmt::Display) -> AppError {
    let message = message.into();
    warn!(status = status.as_u16(), %message, error = %detail, "request failed");
    AppError::new(status, message)
}
