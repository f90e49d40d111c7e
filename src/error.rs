//! Typed errors for API operations
//!
//! Provides structured error types so handlers can map failure modes to
//! HTTP responses without string matching. Internal detail is logged,
//! never returned to the caller.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Service errors with typed variants
///
/// - `Unauthorized` (401) - missing/invalid/expired credentials; the body
///   never says which check failed
/// - `Forbidden` (403) - authenticated but lacking a required scope
/// - `RateLimited` (429) - sliding window exhausted; carries reset metadata
/// - `NotFound` (404) - missing resource
/// - `BadRequest` (400) - malformed input; caller error
/// - `Internal` (500) - anything else; detail goes to the log only
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("could not validate credentials")]
    Unauthorized,

    #[error("insufficient permissions")]
    Forbidden,

    /// Sliding window exhausted. `reset` is the unix timestamp at which the
    /// window rolls past the current instant.
    #[error("too many requests")]
    RateLimited { limit: usize, reset: i64 },

    #[error("{0} not found")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::Unauthorized => {
                serde_json::json!({ "detail": "Could not validate credentials" })
            }
            ApiError::Forbidden => {
                serde_json::json!({ "detail": "Insufficient permissions" })
            }
            ApiError::RateLimited { limit, reset } => serde_json::json!({
                "detail": "Too many requests. Please try again later.",
                "limit": limit,
                "reset": reset,
            }),
            ApiError::NotFound(what) => {
                serde_json::json!({ "detail": format!("{} not found", what) })
            }
            ApiError::BadRequest(msg) => serde_json::json!({ "detail": msg }),
            ApiError::Internal(e) => {
                tracing::error!("internal error: {:#}", e);
                serde_json::json!({ "detail": "Internal server error. Please try again later." })
            }
        };

        let mut response = (status, Json(body)).into_response();
        match &self {
            ApiError::Unauthorized => {
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            }
            ApiError::RateLimited { limit, reset } => {
                let headers = response.headers_mut();
                if let Ok(v) = HeaderValue::from_str(&limit.to_string()) {
                    headers.insert("X-RateLimit-Limit", v);
                }
                headers.insert("X-RateLimit-Remaining", HeaderValue::from_static("0"));
                if let Ok(v) = HeaderValue::from_str(&reset.to_string()) {
                    headers.insert("X-RateLimit-Reset", v);
                }
            }
            _ => {}
        }
        response
    }
}
