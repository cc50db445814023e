//! Conversion types
//!
//! Job records, quality presets and errors for recording conversion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Conversion quality levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionQuality {
    Low,
    Medium,
    #[default]
    High,
    Lossless,
}

impl ConversionQuality {
    /// CRF value for H.264 encoding
    /// Lower values = higher quality, larger files
    pub fn crf(&self) -> u8 {
        match self {
            ConversionQuality::Low => 28,
            ConversionQuality::Medium => 23,
            ConversionQuality::High => 17,
            // CRF 0 trips up yuv420p players
            ConversionQuality::Lossless => 1,
        }
    }

    /// FFmpeg preset for H.264 encoding
    pub fn h264_preset(&self) -> &'static str {
        match self {
            ConversionQuality::Low => "faster",
            ConversionQuality::Medium => "medium",
            ConversionQuality::High => "slow",
            ConversionQuality::Lossless => "veryslow",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionState {
    Queued,
    Converting,
    Completed,
    Failed,
}

/// One conversion of a finished recording, keyed by its source path
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionJob {
    pub source_path: PathBuf,
    pub target_path: PathBuf,
    pub state: ConversionState,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub source_size_bytes: u64,
}

/// What callers polling a conversion see
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionStatus {
    pub state: ConversionState,
    /// Estimated percentage, 0-99. See [`super::coordinator::estimate_progress`].
    pub progress: u8,
    pub target_path: PathBuf,
}

/// Conversion errors
#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("Conversion already queued for {0}")]
    AlreadyQueued(PathBuf),

    #[error("Conversion already running for {0}")]
    AlreadyConverting(PathBuf),

    #[error("Source recording not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("Transcode failed: {0}")]
    TranscodeFailed(String),

    #[error("Conversion worker pool closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConversionError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            ConversionError::AlreadyQueued(_) => "ALREADY_QUEUED",
            ConversionError::AlreadyConverting(_) => "ALREADY_CONVERTING",
            ConversionError::SourceNotFound(_) => "RECORDING_NOT_FOUND",
            ConversionError::TranscodeFailed(_) => "TRANSCODE_FAILED",
            ConversionError::Closed => "CONVERSION_CLOSED",
            ConversionError::Io(_) => "IO_ERROR",
        }
    }
}

pub type ConversionResult<T> = Result<T, ConversionError>;
