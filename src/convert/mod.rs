//! Recording conversion module
//!
//! This module converts finished recordings to other containers in the
//! background and reports their progress.

pub mod coordinator;
pub mod ffmpeg;
pub mod types;

pub use coordinator::{estimate_progress, ConversionCoordinator, ConversionTicket, EnqueueOutcome};
pub use ffmpeg::{FfmpegTranscoder, Transcoder};
pub use types::{
    ConversionError, ConversionJob, ConversionQuality, ConversionResult, ConversionState,
    ConversionStatus,
};
