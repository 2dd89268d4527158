use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AppError {
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Transport-level failures the caller may retry with the identical action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::DeadlineExceeded(_) | AppError::Unavailable(_))
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Unauthenticated(_) => "unauthenticated",
            AppError::InvalidArgument(_) => "invalid-argument",
            AppError::PermissionDenied(_) => "permission-denied",
            AppError::NotFound(_) => "not-found",
            AppError::Conflict(_) => "conflict",
            AppError::DeadlineExceeded(_) => "deadline-exceeded",
            AppError::Unavailable(_) => "unavailable",
            AppError::Internal(_) => "internal",
        }
    }

    /// Rebuilds an error from the wire `code` and message.
    pub fn from_code(code: &str, message: String) -> Self {
        match code {
            "unauthenticated" => AppError::Unauthenticated(message),
            "invalid-argument" => AppError::InvalidArgument(message),
            "permission-denied" => AppError::PermissionDenied(message),
            "not-found" => AppError::NotFound(message),
            "conflict" => AppError::Conflict(message),
            "deadline-exceeded" => AppError::DeadlineExceeded(message),
            "unavailable" => AppError::Unavailable(message),
            _ => AppError::Internal(message),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Unauthenticated(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::InvalidArgument(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::PermissionDenied(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::DeadlineExceeded(msg) => (StatusCode::GATEWAY_TIMEOUT, msg.clone()),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message,
            "code": self.code(),
        }));

        (status, body).into_response()
    }
}
