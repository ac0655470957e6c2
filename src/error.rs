// src/error.rs
// Defines the application error type and its conversion into HTTP responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json; // For creating JSON error bodies

#[derive(Debug)]
pub enum AppError {
    // The requested photo does not exist (or vanished before it could be opened)
    NotFound(String),

    // Abuse control
    CooldownActive { wait_secs: u64 },
    Banned { minutes_left: u64 },

    // Errors related to request processing
    MultipartError(axum::extract::multipart::MultipartError),

    // General I/O or internal errors
    IoError(std::io::Error),
    InternalServerError(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::CooldownActive { .. } | AppError::Banned { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            AppError::MultipartError(_) => StatusCode::BAD_REQUEST,
            AppError::IoError(_) | AppError::InternalServerError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::NotFound(s) => write!(f, "{}", s),
            AppError::CooldownActive { wait_secs } => {
                write!(f, "Download cooldown active, retry in {}s", wait_secs)
            }
            AppError::Banned { minutes_left } => {
                write!(f, "IP banned for another {} minute(s)", minutes_left)
            }
            AppError::MultipartError(e) => write!(f, "Invalid multipart request: {}", e),
            AppError::IoError(e) => write!(f, "An I/O error occurred: {}", e),
            AppError::InternalServerError(s) => write!(f, "{}", s),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // The 429 bodies are read by the gallery front-end, so their keys are fixed.
        let body = match &self {
            AppError::NotFound(s) => json!({
                "error": s,
                "code": "NOT_FOUND",
            }),
            AppError::CooldownActive { wait_secs } => json!({
                "error": "Download cooldown active",
                "code": "COOLDOWN_ACTIVE",
                "waitTime": wait_secs,
            }),
            AppError::Banned { minutes_left } => json!({
                "error": "IP banned",
                "code": "IP_BANNED",
                "banTimeLeft": minutes_left,
            }),
            AppError::MultipartError(_) => json!({
                "error": self.to_string(),
                "code": "MULTIPART_ERROR",
            }),
            AppError::IoError(e) => {
                tracing::error!("Request failed with I/O error: {}", e);
                json!({
                    "error": "Internal I/O error",
                    "code": "IO_ERROR",
                })
            }
            AppError::InternalServerError(s) => {
                tracing::error!("Request failed: {}", s);
                json!({
                    "error": "Internal server error",
                    "code": "INTERNAL_SERVER_ERROR",
                })
            }
        };

        (status, Json(body)).into_response()
    }
}

// Implement From trait for common error types to simplify error handling in handlers.
impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::IoError(err)
    }
}

impl From<axum::extract::multipart::MultipartError> for AppError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        AppError::MultipartError(err)
    }
}

// Helper for locking mutexes, converting PoisonError to AppError
pub fn lock_mutex_app_error<'a, T>(
    mutex: &'a std::sync::Mutex<T>,
    operation_name: &'static str,
) -> Result<std::sync::MutexGuard<'a, T>, AppError> {
    mutex.lock().map_err(|e| {
        AppError::InternalServerError(format!(
            "Failed to acquire lock for {}: {}",
            operation_name, e
        ))
    })
}
