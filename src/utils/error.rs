//! Error types and handling
//!
//! Common error types used across the application and their HTTP form.

use crate::capture::CaptureError;
use crate::convert::ConversionError;
use crate::library::LibraryError;
use crate::recorder::RecorderError;
use crate::registry::RegistryError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Recorder(#[from] RecorderError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Library(#[from] LibraryError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Missing or invalid API token")]
    Unauthorized,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Recorder(e) => e.code(),
            AppError::Registry(RegistryError::StreamNotFound(_)) => "STREAM_NOT_FOUND",
            AppError::Registry(RegistryError::InvalidStream(_)) => "INVALID_STREAM",
            AppError::Registry(_) => "REGISTRY_ERROR",
            AppError::Conversion(e) => e.code(),
            AppError::Library(e) => e.code(),
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Recorder(e) => match e {
                RecorderError::SessionConflict { .. } => StatusCode::CONFLICT,
                RecorderError::StreamNotFound(_) | RecorderError::SessionNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                RecorderError::Capture(
                    CaptureError::LaunchFailed(_)
                    | CaptureError::NavigationTimeout(_)
                    | CaptureError::NavigationFailed(_),
                ) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::Registry(e) => match e {
                RegistryError::StreamNotFound(_) => StatusCode::NOT_FOUND,
                RegistryError::InvalidStream(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::Conversion(e) => match e {
                ConversionError::AlreadyQueued(_) | ConversionError::AlreadyConverting(_) => {
                    StatusCode::CONFLICT
                }
                ConversionError::SourceNotFound(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::Library(e) => match e {
                LibraryError::NotFound(_) => StatusCode::NOT_FOUND,
                LibraryError::InvalidName(_) => StatusCode::BAD_REQUEST,
                LibraryError::RecordingActive(_) => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Io(_) | AppError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error body returned to API clients
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<&AppError> for ErrorResponse {
    fn from(error: &AppError) -> Self {
        ErrorResponse {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::debug!("Request rejected ({}): {}", status, self);
        }
        (status, Json(ErrorResponse::from(&self))).into_response()
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        let conflict = AppError::from(RecorderError::SessionConflict {
            stream_id: "s".to_string(),
            session_id: "x".to_string(),
        });
        assert_eq!(conflict.status(), StatusCode::CONFLICT);
        assert_eq!(conflict.code(), "SESSION_CONFLICT");

        let timeout = AppError::from(RecorderError::from(CaptureError::NavigationTimeout(
            Duration::from_secs(60),
        )));
        assert_eq!(timeout.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(timeout.code(), "NAVIGATION_TIMEOUT");

        let missing = AppError::from(RegistryError::StreamNotFound("s".to_string()));
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let queued = AppError::from(ConversionError::AlreadyQueued("a.webm".into()));
        assert_eq!(queued.status(), StatusCode::CONFLICT);
        assert_eq!(queued.code(), "ALREADY_QUEUED");

        let bad_name = AppError::from(LibraryError::InvalidName("../x".to_string()));
        assert_eq!(bad_name.status(), StatusCode::BAD_REQUEST);

        assert_eq!(AppError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_error_response_body() {
        let body = ErrorResponse::from(&AppError::from(RecorderError::SessionNotFound(
            "abc".to_string(),
        )));
        assert_eq!(body.code, "SESSION_NOT_FOUND");
        assert!(body.message.contains("abc"));
    }
}
