//! Error responses for web handlers and guards.
//!
//! Every error renders as the same JSON envelope the booking frontend
//! already understands:
//!
//! ```json
//! { "success": false, "message": "...", "error": "..." }
//! ```

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::fmt;

/// Application error type for web handlers.
///
/// # Examples
///
/// ```ignore
/// async fn handler() -> Result<Json<Data>, AppError> {
///     Err(AppError::forbidden("Not now").with_detail("Try again later"))
/// }
/// ```
#[derive(Debug, Clone)]
pub struct AppError {
    status: StatusCode,
    message: String,
    detail: String,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub const fn new(status: StatusCode, message: String, detail: String) -> Self {
        Self {
            status,
            message,
            detail,
        }
    }

    /// Replace the `error` field of the response body.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    /// Create a 403 Forbidden error.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message.into(), "Forbidden".to_string())
    }

    /// HTTP status of the response.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.status.as_u16(), self.message, self.detail)
    }
}

impl std::error::Error for AppError {}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    success: bool,
    message: String,
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(
                status = %self.status,
                message = %self.message,
                error = %self.detail,
                "Internal server error"
            );
        }

        let body = ErrorResponse {
            success: false,
            message: self.message,
            error: self.detail,
        };

        (self.status, Json(body)).into_response()
    }
}
