use axum::{http::StatusCode, response::IntoResponse, Json};
use thiserror::Error;

use crate::state::TaskStatus;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("No data: {0}")]
    NoData(String),

    #[error("Task {task_id} cannot move from {from} to {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Stored data error: {0}")]
    Storage(String),

    #[error("Upstream response error: {0}")]
    Upstream(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Stable machine-readable code carried in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidParameter(_) => "INVALID_PARAMETER",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::TaskNotFound(_) => "TASK_NOT_FOUND",
            AppError::NoData(_) => "NO_DATA",
            AppError::InvalidTransition { .. } => "INVALID_STATE",
            _ => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidParameter(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) | AppError::TaskNotFound(_) | AppError::NoData(_) => {
                StatusCode::NOT_FOUND
            }
            AppError::InvalidTransition { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = serde_json::json!({
            "status": "error",
            "error_code": self.code(),
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}
