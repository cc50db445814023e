//! FFmpeg transcoder
//!
//! Converts finished WebM recordings to H.264/AAC MP4 by shelling out to
//! `ffmpeg`. The target file grows while ffmpeg runs, which is what the
//! progress estimate watches.

use super::types::{ConversionError, ConversionQuality, ConversionResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Extension of converted recordings
pub const TARGET_EXTENSION: &str = "mp4";

/// Converts a recording from one container/codec to another
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Path the conversion of `source` is written to
    fn target_path(&self, source: &Path) -> PathBuf {
        source.with_extension(TARGET_EXTENSION)
    }

    async fn convert(&self, source: &Path, target: &Path) -> ConversionResult<()>;
}

#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    program: String,
    quality: ConversionQuality,
}

impl FfmpegTranscoder {
    pub fn new(quality: ConversionQuality) -> Self {
        Self {
            program: "ffmpeg".to_string(),
            quality,
        }
    }

    /// Use a different ffmpeg binary
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

/// Arguments for converting `source` into `target`
pub fn build_convert_args(source: &Path, target: &Path, quality: ConversionQuality) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-i".to_string(),
        source.to_string_lossy().to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        quality.h264_preset().to_string(),
        "-crf".to_string(),
        quality.crf().to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        "192k".to_string(),
        target.to_string_lossy().to_string(),
    ]
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn convert(&self, source: &Path, target: &Path) -> ConversionResult<()> {
        let args = build_convert_args(source, target, self.quality);
        tracing::info!("Starting FFmpeg conversion: {:?}", args);

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ConversionError::TranscodeFailed(format!("Failed to start FFmpeg: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            return Err(ConversionError::TranscodeFailed(format!(
                "FFmpeg exited with {}: {}",
                output.status,
                tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
            )));
        }

        tracing::info!("FFmpeg conversion finished: {:?}", target);
        Ok(())
    }
}
