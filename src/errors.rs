use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Unique error codes for client identification
#[derive(Debug, Clone, Copy)]
pub enum ErrorCode {
    // Database errors (1xxx)
    DatabaseQuery = 1001,

    // Validation errors (2xxx)
    ValidationFailed = 2001,
    PayloadTooLarge = 2002,

    // External service errors (5xxx)
    EmbeddingServiceError = 5001,
    CompletionUnavailable = 5002,
    CompletionServiceError = 5003,
}

impl ErrorCode {
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }
}

/// Application error types with context
#[derive(Error, Debug)]
pub enum AppError {
    // Database errors
    #[error("Database query error: {0}")]
    DatabaseQueryError(#[from] sea_orm::DbErr),

    // Validation errors
    #[error("Validation failed: {0}")]
    ValidationError(String),

    #[error("Payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    // External service errors
    #[error("Embedding service error: {0}")]
    EmbeddingError(String),

    #[error("Completion service not configured")]
    CompletionUnavailable,

    #[error("Completion service error: {0}")]
    CompletionError(String),
}

impl AppError {
    /// Get the error code for this error type
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::DatabaseQueryError(_) => ErrorCode::DatabaseQuery,
            Self::ValidationError(_) => ErrorCode::ValidationFailed,
            Self::PayloadTooLarge { .. } => ErrorCode::PayloadTooLarge,
            Self::EmbeddingError(_) => ErrorCode::EmbeddingServiceError,
            Self::CompletionUnavailable => ErrorCode::CompletionUnavailable,
            Self::CompletionError(_) => ErrorCode::CompletionServiceError,
        }
    }

    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseQueryError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::EmbeddingError(_) => StatusCode::BAD_GATEWAY,
            Self::CompletionUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::CompletionError(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();
        let message = self.to_string();

        // Log based on severity
        match &self {
            AppError::ValidationError(_) | AppError::PayloadTooLarge { .. } => {
                tracing::debug!(error_code = error_code.as_u16(), %message, "Client error");
            }
            AppError::CompletionUnavailable => {
                tracing::warn!(error_code = error_code.as_u16(), %message, "Service unavailable");
            }
            _ => {
                tracing::error!(
                    error_code = error_code.as_u16(),
                    %message,
                    error = ?self,
                    "Server error"
                );
            }
        };

        let body = Json(json!({
            "error": {
                "code": error_code.as_u16(),
                "status": status.as_u16(),
                "message": message,
                "details": if cfg!(debug_assertions) {
                    Some(format!("{:?}", self))
                } else {
                    None
                }
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_unavailable_maps_to_503() {
        let err = AppError::CompletionUnavailable;
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.error_code().as_u16(), 5002);
    }

    #[test]
    fn validation_errors_are_client_errors() {
        let err = AppError::ValidationError("question: too long".into());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.error_code().as_u16(), 2001);
    }
}
