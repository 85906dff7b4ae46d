use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::engine::EngineError;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<&'static str>,
}

/// Everything a handler can fail with. Engine errors pass through; the
/// rest come from the HTTP layer itself.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// Body, path, or query could not be decoded.
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("{0}")]
    Forbidden(&'static str),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Engine(e) => match e {
                EngineError::Validation { .. } => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
                EngineError::LimitExceeded(_) => (StatusCode::BAD_REQUEST, "LIMIT_EXCEEDED"),
                EngineError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                EngineError::SlotConflict { .. } => (StatusCode::CONFLICT, "SLOT_CONFLICT"),
                EngineError::InvalidTransition { .. } => (StatusCode::CONFLICT, "INVALID_TRANSITION"),
                EngineError::ReferenceCollision(_) | EngineError::Internal(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
                }
            },
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let (message, field) = match &self {
            ApiError::Engine(EngineError::Validation { field, message }) => (message.clone(), Some(*field)),
            ApiError::Engine(EngineError::SlotConflict { .. }) => (
                "the requested time is no longer available, please pick another slot".to_string(),
                None,
            ),
            _ if status.is_server_error() => {
                tracing::error!(error = %self, "internal server error");
                ("an internal error occurred".to_string(), None)
            }
            other => (other.to_string(), None),
        };

        (status, Json(ErrorBody { error: ErrorDetail { code, message, field } })).into_response()
    }
}
