//! Request middleware
//!
//! Provides:
//! - Request ID propagation for tracing
//! - Payload size limiting

use axum::{
    extract::Request,
    http::{header, HeaderValue},
    middleware::Next,
    response::Response,
};

use crate::errors::AppError;

/// Header carrying the per-request correlation id
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Maximum payload size in bytes (64KB); questions are short
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// Request ID middleware
///
/// Keeps an incoming id when the caller supplied one, otherwise mints a
/// fresh UUID, and echoes the id on the response.
pub async fn request_id(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    match HeaderValue::from_str(&request_id) {
        Ok(value) => {
            request.headers_mut().insert(REQUEST_ID_HEADER, value.clone());
            let mut response = next.run(request).await;
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
            response
        }
        // Unreachable for values that already passed to_str
        Err(_) => next.run(request).await,
    }
}

/// Content-Length validation middleware
///
/// Rejects requests exceeding MAX_PAYLOAD_SIZE before reading the body.
pub async fn content_length_limit(request: Request, next: Next) -> Result<Response, AppError> {
    if let Some(content_length) = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<usize>().ok())
    {
        if content_length > MAX_PAYLOAD_SIZE {
            return Err(AppError::PayloadTooLarge {
                size: content_length,
                limit: MAX_PAYLOAD_SIZE,
            });
        }
    }

    Ok(next.run(request).await)
}
