//! HTTP error mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Error carrying the status it should answer with. Anything converted
/// via `?` without an explicit status becomes a 500.
pub struct AppError {
    status: StatusCode,
    error: anyhow::Error,
}

impl AppError {
    pub fn with_status(status: StatusCode, error: anyhow::Error) -> Self {
        Self { status, error }
    }

    pub fn bad_request(error: impl Into<anyhow::Error>) -> Self {
        Self::with_status(StatusCode::BAD_REQUEST, error.into())
    }

    pub fn not_found(error: impl Into<anyhow::Error>) -> Self {
        Self::with_status(StatusCode::NOT_FOUND, error.into())
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: err.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, "request error: {:?}", self.error);
        } else {
            tracing::debug!(status = %self.status, "request rejected: {}", self.error);
        }
        (
            self.status,
            Json(json!({ "error": self.error.to_string() })),
        )
            .into_response()
    }
}
