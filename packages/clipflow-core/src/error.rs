//! Centralized error types for the ClipFlow core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to machine-readable codes and HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::store::StoreError;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

/// Application-wide error type for the ClipFlow server.
///
/// Every variant corresponds to one machine code in the API error taxonomy.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Request payload failed schema validation.
    ///
    /// Carries structured per-field issues that are surfaced in the
    /// response body under `details`.
    #[error("Invalid input: {message}")]
    InvalidInput {
        message: String,
        details: Option<Value>,
    },

    /// No viewer token, or the token failed upstream validation.
    #[error("Not authenticated: {0}")]
    NotAuthenticated(String),

    /// Authenticated but lacking the required role.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Clip UUID does not exist in the store.
    #[error("Clip not found: {0}")]
    ClipNotFound(String),

    /// Clip exists but is not currently in the queue.
    #[error("Clip not in queue: {0}")]
    ClipNotInQueue(String),

    /// Clip is not present in the play history.
    #[error("Clip not in history: {0}")]
    ClipNotInHistory(String),

    /// No pending clip with the given UUID.
    #[error("Pending clip not found: {0}")]
    PendingClipNotFound(String),

    /// No rejected clip with the given UUID.
    #[error("Rejected clip not found: {0}")]
    RejectedClipNotFound(String),

    /// Restore requested for a clip that is not in rejected status.
    #[error("Clip not rejected: {0}")]
    ClipNotRejected(String),

    /// Settings payload failed validation.
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    /// Caller exceeded a rate-limit bucket.
    #[error("Rate limited")]
    RateLimited,

    /// Request origin is not in the allowed set.
    #[error("Domain not allowed: {0}")]
    DomainNotAllowed(String),

    /// Internal server error. The message is logged but never sent to
    /// clients in production.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Convenience constructor for validation failures without field issues.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
            details: None,
        }
    }

    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::NotAuthenticated(_) => "NOT_AUTHENTICATED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::ClipNotFound(_) => "CLIP_NOT_FOUND",
            Self::ClipNotInQueue(_) => "CLIP_NOT_IN_QUEUE",
            Self::ClipNotInHistory(_) => "CLIP_NOT_IN_HISTORY",
            Self::PendingClipNotFound(_) => "PENDING_CLIP_NOT_FOUND",
            Self::RejectedClipNotFound(_) => "REJECTED_CLIP_NOT_FOUND",
            Self::ClipNotRejected(_) => "CLIP_NOT_REJECTED",
            Self::InvalidSettings(_) => "INVALID_SETTINGS",
            Self::RateLimited => "RATE_LIMITED",
            Self::DomainNotAllowed(_) => "DOMAIN_NOT_ALLOWED",
            Self::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput { .. } | Self::InvalidSettings(_) => StatusCode::BAD_REQUEST,
            Self::NotAuthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) | Self::DomainNotAllowed(_) => StatusCode::FORBIDDEN,
            Self::ClipNotFound(_)
            | Self::ClipNotInQueue(_)
            | Self::ClipNotInHistory(_)
            | Self::PendingClipNotFound(_)
            | Self::RejectedClipNotFound(_) => StatusCode::NOT_FOUND,
            Self::ClipNotRejected(_) => StatusCode::CONFLICT,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type ApiResult<T> = Result<T, ApiError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        // Internal failures are logged server-side; the client only sees
        // the machine code. Stack traces and store messages stay out of
        // responses.
        let message = match &self {
            Self::Internal(detail) => {
                log::error!("[Api] Internal error: {}", detail);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let details = match self {
            Self::InvalidInput { details, .. } => details,
            _ => None,
        };

        let body = ErrorResponse {
            error: code,
            message,
            status: status.as_u16(),
            details,
        };
        (status, Json(body)).into_response()
    }
}

impl ErrorCode for crate::resolvers::ResolveError {
    fn code(&self) -> &'static str {
        use crate::resolvers::ResolveError;
        match self {
            ResolveError::InvalidUrl => "invalid_clip_url",
            ResolveError::NotFound => "clip_not_found_upstream",
            ResolveError::Upstream(_) => "upstream_error_status",
            ResolveError::Timeout => "upstream_timeout",
            ResolveError::Network(_) => "network_error",
            ResolveError::Payload(_) => "upstream_payload_error",
        }
    }
}

impl ErrorCode for crate::token::TokenError {
    fn code(&self) -> &'static str {
        use crate::token::TokenError;
        match self {
            TokenError::NoRefreshToken => "no_refresh_token",
            TokenError::RefreshRejected => "refresh_rejected",
            TokenError::Upstream(_) => "token_endpoint_error",
            TokenError::Network(_) => "network_error",
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(msg) => Self::invalid_input(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_authenticated_maps_to_401() {
        let err = ApiError::NotAuthenticated("missing cookie".into());
        assert_eq!(err.code(), "NOT_AUTHENTICATED");
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn not_found_family_maps_to_404() {
        for err in [
            ApiError::ClipNotFound("twitch:a".into()),
            ApiError::ClipNotInQueue("twitch:a".into()),
            ApiError::ClipNotInHistory("twitch:a".into()),
            ApiError::PendingClipNotFound("twitch:a".into()),
            ApiError::RejectedClipNotFound("twitch:a".into()),
        ] {
            assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        }
    }

    #[test]
    fn rate_limited_maps_to_429() {
        assert_eq!(ApiError::RateLimited.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ApiError::RateLimited.code(), "RATE_LIMITED");
    }

    #[test]
    fn storage_error_converts_to_internal() {
        let err: ApiError = StoreError::Corrupt("bad row".into()).into();
        assert_eq!(err.code(), "INTERNAL_SERVER_ERROR");
    }

    #[test]
    fn validation_error_converts_to_invalid_input() {
        let err: ApiError = StoreError::Validation("empty title".into()).into();
        assert_eq!(err.code(), "INVALID_INPUT");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
