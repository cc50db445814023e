//! Registry schema definitions
//!
//! These types define the on-disk `config.json` layout. Field names stay
//! compatible with config files written by earlier versions of the service
//! (`name`, `url`, `addedAt`).

use crate::convert::types::ConversionQuality;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// =============================================================================
// Settings
// =============================================================================

/// Capture quality handed to the capture backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoQuality {
    pub width: u32,
    pub height: u32,
    pub video_bitrate: u64,
    pub audio_bitrate: u64,
}

impl Default for VideoQuality {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            video_bitrate: 8_000_000,
            audio_bitrate: 192_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Recordings directory, relative to the config file unless absolute
    pub recordings_path: PathBuf,
    pub default_video_quality: VideoQuality,
    /// Upper bound on loading the source page
    pub navigation_timeout_secs: u64,
    /// Grace period for buffered media after the capture is released
    pub drain_delay_ms: u64,
    /// Queue a conversion for every successfully stopped session
    pub auto_convert: bool,
    pub max_concurrent_conversions: usize,
    pub conversion_quality: ConversionQuality,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            recordings_path: PathBuf::from("recordings"),
            default_video_quality: VideoQuality::default(),
            navigation_timeout_secs: 60,
            drain_delay_ms: 1000,
            auto_convert: false,
            max_concurrent_conversions: 1,
            conversion_quality: ConversionQuality::High,
        }
    }
}

// =============================================================================
// Streams
// =============================================================================

/// Pointer to the session currently recording a stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingStateRecord {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub output_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingOutcome {
    Completed,
    Failed,
}

/// Terminal record of the most recent session of a stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastRecording {
    pub session_id: String,
    pub output_path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub stopped_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub size_bytes: u64,
    pub outcome: RecordingOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A named, reusable recording source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamDescriptor {
    pub id: String,
    #[serde(rename = "name", alias = "displayName")]
    pub display_name: String,
    #[serde(rename = "url", alias = "sourceUrl")]
    pub source_url: String,
    #[serde(rename = "addedAt", alias = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording_state: Option<RecordingStateRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_recording: Option<LastRecording>,
}

impl StreamDescriptor {
    /// Create a descriptor with a fresh id. The name falls back to the url.
    pub fn new(source_url: String, display_name: Option<String>) -> Self {
        let display_name = display_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| source_url.clone());
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            display_name,
            source_url,
            created_at: Utc::now(),
            recording_state: None,
            last_recording: None,
        }
    }
}

/// Fields a caller may change on an existing stream
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamUpdate {
    #[serde(default, alias = "sourceUrl")]
    pub url: Option<String>,
    #[serde(default, alias = "displayName")]
    pub name: Option<String>,
}

// =============================================================================
// File
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFile {
    #[serde(default)]
    pub streams: Vec<StreamDescriptor>,
    #[serde(default)]
    pub settings: Settings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_legacy_layout() {
        let json = r#"{
            "streams": [
                {"id": "1700000000000", "url": "https://example.test/live", "name": "Morning Show", "addedAt": "2024-01-01T00:00:00Z"}
            ],
            "settings": {
                "recordingsPath": "recordings",
                "defaultVideoQuality": {"width": 1280, "height": 720, "videoBitrate": 4000000, "audioBitrate": 128000}
            }
        }"#;

        let config: ConfigFile = serde_json::from_str(json).unwrap();
        assert_eq!(config.streams.len(), 1);
        assert_eq!(config.streams[0].display_name, "Morning Show");
        assert_eq!(config.streams[0].source_url, "https://example.test/live");
        assert!(config.streams[0].recording_state.is_none());
        assert_eq!(config.settings.default_video_quality.width, 1280);
        assert_eq!(config.settings.navigation_timeout_secs, 60);
        assert_eq!(config.settings.drain_delay_ms, 1000);
    }

    #[test]
    fn test_name_falls_back_to_url() {
        let stream = StreamDescriptor::new("https://example.test/a".to_string(), Some("  ".to_string()));
        assert_eq!(stream.display_name, "https://example.test/a");
        assert!(!stream.id.is_empty());
    }
}
