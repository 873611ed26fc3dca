//! Error types for the CAFF Share server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use caffshare_ids::IdError;

use crate::pipeline::{FailureKind, IngestError};
use crate::storage::StorageError;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        match (err.kind(), err) {
            (_, IngestError::OwnerNotFound(id)) => {
                AppError::NotFound(format!("No User was found with the id {}!", id))
            }
            (FailureKind::MalformedRequest | FailureKind::InvalidContent, err) => {
                AppError::BadRequest(err.to_string())
            }
            (FailureKind::Infrastructure, IngestError::Lookup(e)) => AppError::Database(e),
            (FailureKind::Infrastructure, err) => AppError::Internal(err.to_string()),
        }
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<IdError> for AppError {
    fn from(err: IdError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg).into_response(),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            AppError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg).into_response(),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
        }
    }
}
