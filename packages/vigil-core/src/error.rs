//! Centralized error type for the Vigil core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses
//!
//! Per the core's design notes, only three kinds of recoverable condition are ever worth a
//! typed error: a transient inference failure (absorbed into SAFE_MODE, never surfaced as a
//! `CoreError`), a source-fatal condition (ends the current attach), and a subscriber-transient
//! condition (drop one message). Everything this type actually carries is one of those, plus
//! the handful of request-validation/internal variants the REST surface needs.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Application-wide error type for the Vigil server.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum CoreError {
    /// A source could not be opened or failed unrecoverably; the manager transitions to
    /// `ERROR`.
    #[error("Source error: {0}")]
    Source(String),

    /// Requested viewer id does not exist in the registry.
    #[error("Viewer not found: {0}")]
    ViewerNotFound(String),

    /// Client sent an invalid or malformed request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Uploaded file has an unsupported extension.
    #[error("Invalid file type: {0}")]
    InvalidFileType(String),

    /// Network-related error (IP detection, connection issues).
    #[error("Network error: {0}")]
    Network(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Server configuration error (failed validation at startup).
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl CoreError {
    /// Returns a machine-readable error code for API responses.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Source(_) => "source_error",
            Self::ViewerNotFound(_) => "viewer_not_found",
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidFileType(_) => "invalid_file_type",
            Self::Network(_) => "network_error",
            Self::Internal(_) => "internal_error",
            Self::Configuration(_) => "configuration_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ViewerNotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidRequest(_) | Self::InvalidFileType(_) => StatusCode::BAD_REQUEST,
            Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Source(_) | Self::Network(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_file_type_returns_bad_request() {
        let err = CoreError::InvalidFileType("exe".into());
        assert_eq!(err.code(), "invalid_file_type");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn viewer_not_found_returns_not_found() {
        let err = CoreError::ViewerNotFound("v1".into());
        assert_eq!(err.code(), "viewer_not_found");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn configuration_error_returns_service_unavailable() {
        let err = CoreError::Configuration("bad config".into());
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
