use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use covidkm::{OrchestrationError, StoreError};
use serde_json::json;
use tracing::{error, warn};

/// A custom error type for the server application.
///
/// This enum encapsulates different kinds of errors that can occur within the server,
/// allowing them to be converted into appropriate HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Errors returned by the pipeline orchestrator.
    Orchestration(OrchestrationError),
    /// Errors originating from the pipeline store.
    Store(StoreError),
    NotFound(String),
    BadRequest(String),
    /// A dependency (usually the store) is not reachable.
    Unavailable(String),
    /// Generic internal server errors.
    Internal(anyhow::Error),
}

impl From<OrchestrationError> for AppError {
    fn from(err: OrchestrationError) -> Self {
        AppError::Orchestration(err)
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Store(err)
    }
}

/// Conversion from `anyhow::Error` to `AppError`.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status_code, error_message) = match self {
            AppError::Orchestration(err) => match err {
                OrchestrationError::AlreadyRunning | OrchestrationError::Cancelled { .. } => {
                    warn!("Run rejected or interrupted: {err}");
                    (StatusCode::CONFLICT, err.to_string())
                }
                OrchestrationError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, err.to_string()),
                OrchestrationError::Fatal(_) => {
                    error!("Fatal orchestration error: {err}");
                    (StatusCode::SERVICE_UNAVAILABLE, err.to_string())
                }
            },
            AppError::Store(err) => match err {
                StoreError::JobNotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
                StoreError::JobExists(_) => (StatusCode::CONFLICT, err.to_string()),
                StoreError::Connection(_) => {
                    error!("StoreError: {:?}", err);
                    (StatusCode::SERVICE_UNAVAILABLE, err.to_string())
                }
                _ => {
                    error!("StoreError: {:?}", err);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        format!("Storage error: {err}"),
                    )
                }
            },
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unavailable(msg) => {
                warn!("Service unavailable: {msg}");
                (StatusCode::SERVICE_UNAVAILABLE, msg)
            }
            AppError::Internal(err) => {
                error!("Internal server error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal server error occurred.".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status_code, body).into_response()
    }
}
