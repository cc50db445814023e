use super::pipeline::TeardownFailure;
use crate::capture::CaptureError;
use crate::registry::RegistryError;
use thiserror::Error;

/// Errors surfaced by the session manager
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Stream {stream_id} is already recording (session {session_id})")]
    SessionConflict { stream_id: String, session_id: String },

    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("Sink error: {0}")]
    Sink(#[source] std::io::Error),

    #[error(transparent)]
    Teardown(#[from] TeardownFailure),

    #[error("Registry error: {0}")]
    Registry(RegistryError),

    #[error("Session task did not finish: {0}")]
    Interrupted(String),
}

impl From<RegistryError> for RecorderError {
    fn from(error: RegistryError) -> Self {
        match error {
            RegistryError::StreamNotFound(id) => RecorderError::StreamNotFound(id),
            other => RecorderError::Registry(other),
        }
    }
}

impl RecorderError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            RecorderError::SessionConflict { .. } => "SESSION_CONFLICT",
            RecorderError::StreamNotFound(_) => "STREAM_NOT_FOUND",
            RecorderError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            RecorderError::Capture(e) => e.code(),
            RecorderError::Sink(_) => "IO_ERROR",
            RecorderError::Teardown(_) => "TEARDOWN_FAILED",
            RecorderError::Registry(_) => "REGISTRY_ERROR",
            RecorderError::Interrupted(_) => "INTERRUPTED",
        }
    }
}

/// Result type for recorder operations
pub type RecorderResult<T> = Result<T, RecorderError>;
