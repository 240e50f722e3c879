use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::relay::RelayError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("S3 error: {0}")]
    S3(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Database(e) => {
                tracing::error!("Database error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                )
            }
            AppError::Relay(e) => relay_status(e),
            AppError::S3(msg) => {
                tracing::error!("S3 error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "S3_ERROR",
                    "A storage error occurred".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

/// Relay errors keep their own message in the response body.
fn relay_status(e: &RelayError) -> (StatusCode, &'static str, String) {
    let (status, code) = match e {
        RelayError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
        RelayError::UpstreamAuth(_) => (StatusCode::BAD_GATEWAY, "UPSTREAM_AUTH_ERROR"),
        RelayError::UpstreamTransport { .. } => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR"),
        RelayError::Decode(_) => (StatusCode::BAD_GATEWAY, "UPSTREAM_DECODE_ERROR"),
        RelayError::Persistence(_) => (StatusCode::INTERNAL_SERVER_ERROR, "PERSISTENCE_ERROR"),
    };
    if status.is_server_error() {
        tracing::error!("Relay error: {e}");
    }
    (status, code, e.to_string())
}
