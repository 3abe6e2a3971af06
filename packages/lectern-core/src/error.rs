//! Centralized error types for the Lectern core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::session::SessionStatus;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

/// Errors at the recognizer seam (opening, feeding or draining one
/// bidirectional recognition stream).
#[derive(Debug, Error)]
pub enum RecognizerError {
    /// The stream could not be opened (transport or configuration).
    #[error("failed to open recognizer stream: {0}")]
    Open(String),

    /// The stream broke while sending audio.
    #[error("recognizer stream broken: {0}")]
    Broken(String),

    /// The upstream hard time limit was reached without a prior renewal.
    #[error("recognizer stream timed out upstream")]
    Timeout,
}

impl ErrorCode for RecognizerError {
    fn code(&self) -> &'static str {
        match self {
            Self::Open(_) => "upstream_open_failed",
            Self::Broken(_) => "upstream_transport_error",
            Self::Timeout => "upstream_timeout",
        }
    }
}

/// Application-wide error type for the Lectern core.
#[derive(Debug, Error)]
pub enum LecternError {
    /// An audio chunk failed validation (only surfaced in strict mode;
    /// normal mode repairs malformed input).
    #[error("Invalid audio frame: {0}")]
    InvalidFrame(String),

    /// Lookup or close on an unknown session id.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Create with an id that is already registered.
    #[error("Session already exists: {0}")]
    SessionExists(String),

    /// An operation was attempted in an incompatible session status.
    #[error("Illegal state for {operation}: session is {status:?}")]
    IllegalState {
        operation: &'static str,
        status: SessionStatus,
    },

    /// Recognizer stream failed to open or broke mid-stream.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Client sent an invalid or malformed request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Server configuration error (missing required settings).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LecternError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidFrame(_) => "invalid_frame",
            Self::SessionNotFound(_) => "session_not_found",
            Self::SessionExists(_) => "session_exists",
            Self::IllegalState { .. } => "illegal_state",
            Self::Upstream(_) => "upstream_error",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Configuration(_) => "configuration_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::SessionExists(_) => StatusCode::CONFLICT,
            Self::InvalidFrame(_) | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::IllegalState { .. } => StatusCode::CONFLICT,
            Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type LecternResult<T> = Result<T, LecternError>;

/// Result alias at the recognizer seam.
pub type RecognizerResult<T> = Result<T, RecognizerError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for LecternError {
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

impl From<RecognizerError> for LecternError {
    fn from(err: RecognizerError) -> Self {
        Self::Upstream(err.to_string())
    }
}
