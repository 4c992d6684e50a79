use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use platea_domain::LockError;

#[derive(Debug)]
pub enum AppError {
    AuthenticationError(String),
    ValidationError(String),
    SeatUnavailable,
    ServiceUnavailable(String),
    InternalServerError(String),
    Anyhow(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::AuthenticationError(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg),
            // Expected and frequent under contention; a notice, not an
            // error worth logging.
            AppError::SeatUnavailable => {
                (StatusCode::CONFLICT, "seat is unavailable".to_string())
            }
            AppError::ServiceUnavailable(msg) => {
                tracing::warn!("Transient backend failure: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, "temporarily unavailable".to_string())
            }
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
            }
            AppError::Anyhow(err) => {
                tracing::error!("Internal Server Error: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<LockError> for AppError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::SeatUnavailable => AppError::SeatUnavailable,
            LockError::Transient(msg) => AppError::ServiceUnavailable(msg),
            // A non-owner release is a no-op server-side; if it reaches
            // this layer something upstream misbehaved.
            LockError::OwnershipMismatch => {
                AppError::ValidationError("lock is owned by another session".to_string())
            }
            LockError::ChannelFailure(msg) => AppError::InternalServerError(msg),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Anyhow(err)
    }
}
