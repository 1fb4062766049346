use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::datastore::DatastoreError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Datastore error: {0}")]
    Datastore(#[from] DatastoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// Check if running in production mode (based on RUN_MODE env var)
fn is_production() -> bool {
    std::env::var("RUN_MODE")
        .map(|m| m == "production" || m == "prod")
        .unwrap_or(false)
}

fn redact(detail: String, public: &str) -> String {
    if is_production() {
        public.to_string()
    } else {
        detail
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String, String) {
        match self {
            AppError::Config(e) => {
                let log_msg = e.to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CONFIG_ERROR",
                    redact(log_msg.clone(), "Configuration error"),
                    log_msg,
                )
            }
            AppError::Store(StoreError::NotHandshaken(id)) => (
                StatusCode::NOT_FOUND,
                "NOT_HANDSHAKEN",
                format!("Client {} is not handshaken", id),
                format!("Client {} is not handshaken", id),
            ),
            AppError::Store(StoreError::AlreadyDestroyed(id)) => (
                StatusCode::GONE,
                "ALREADY_DESTROYED",
                format!("Client {} was already destroyed", id),
                format!("Client {} was already destroyed", id),
            ),
            AppError::Store(e) => {
                let log_msg = e.to_string();
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "STORE_ERROR",
                    redact(log_msg.clone(), "Service temporarily unavailable"),
                    log_msg,
                )
            }
            AppError::Datastore(e) => {
                let log_msg = e.to_string();
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "DATASTORE_ERROR",
                    redact(log_msg.clone(), "Service temporarily unavailable"),
                    log_msg,
                )
            }
            AppError::Internal(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                redact(e.clone(), "Internal server error"),
                e.clone(),
            ),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, client_message, log_message) = self.parts();

        // Always log the detailed error server-side
        tracing::error!(
            code = %code,
            status = %status.as_u16(),
            message = %log_message,
            "API error"
        );

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: client_message,
            },
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_handshaken_maps_to_not_found() {
        let err = AppError::from(StoreError::NotHandshaken("abc".to_string()));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_datastore_error_maps_to_unavailable() {
        let err = AppError::from(DatastoreError::CircuitOpen);
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
