//! Technical metadata via ffprobe

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoStreamInfo {
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub bitrate: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioStreamInfo {
    pub codec: String,
    pub channels: u32,
    pub sample_rate: Option<u32>,
    pub bitrate: Option<u64>,
}

/// What ffprobe reports about a media file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TechnicalMetadata {
    /// Seconds
    pub duration: Option<f64>,
    pub size: Option<u64>,
    pub bitrate: Option<u64>,
    pub format: Option<String>,
    pub video: Option<VideoStreamInfo>,
    pub audio: Option<AudioStreamInfo>,
}

/// Run ffprobe on `path`. `None` when ffprobe is missing or fails.
pub async fn probe(ffprobe: &str, path: &Path) -> Option<TechnicalMetadata> {
    let output = Command::new(ffprobe)
        .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
        .arg(path)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await;

    let output = match output {
        Ok(output) => output,
        Err(e) => {
            tracing::debug!("Failed to run ffprobe on {:?}: {}", path, e);
            return None;
        }
    };
    if !output.status.success() {
        tracing::debug!("ffprobe failed on {:?} with {}", path, output.status);
        return None;
    }

    parse_probe_output(&String::from_utf8_lossy(&output.stdout))
}

/// Parse `ffprobe -print_format json -show_format -show_streams` output
pub fn parse_probe_output(json_str: &str) -> Option<TechnicalMetadata> {
    let json: Value = match serde_json::from_str(json_str) {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!("Failed to parse ffprobe output: {}", e);
            return None;
        }
    };

    let format = json.get("format");
    let streams = json
        .get("streams")
        .and_then(|s| s.as_array())
        .map(Vec::as_slice)
        .unwrap_or_default();
    let stream_of = |kind: &str| {
        streams
            .iter()
            .find(|s| s.get("codec_type").and_then(|t| t.as_str()) == Some(kind))
    };

    let video = stream_of("video").map(|s| VideoStreamInfo {
        codec: str_field(s, "codec_name").unwrap_or_else(|| "unknown".to_string()),
        width: s.get("width").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
        height: s.get("height").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
        fps: s
            .get("r_frame_rate")
            .and_then(|v| v.as_str())
            .map(parse_frame_rate)
            .unwrap_or(0.0),
        bitrate: num_field(s, "bit_rate"),
    });

    let audio = stream_of("audio").map(|s| AudioStreamInfo {
        codec: str_field(s, "codec_name").unwrap_or_else(|| "unknown".to_string()),
        channels: s.get("channels").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
        sample_rate: num_field(s, "sample_rate").map(|r| r as u32),
        bitrate: num_field(s, "bit_rate"),
    });

    Some(TechnicalMetadata {
        duration: format
            .and_then(|f| str_field(f, "duration"))
            .and_then(|d| d.parse::<f64>().ok()),
        size: format.and_then(|f| num_field(f, "size")),
        bitrate: format.and_then(|f| num_field(f, "bit_rate")),
        format: format.and_then(|f| str_field(f, "format_name")),
        video,
        audio,
    })
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

/// ffprobe prints most numbers as strings
fn num_field(value: &Value, key: &str) -> Option<u64> {
    match value.get(key)? {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

/// Frame rate as "30/1", "30000/1001" or "29.97"
fn parse_frame_rate(s: &str) -> f64 {
    match s.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().unwrap_or(0.0);
            let den: f64 = den.parse().unwrap_or(1.0);
            if den > 0.0 {
                num / den
            } else {
                0.0
            }
        }
        None => s.parse().unwrap_or(0.0),
    }
}
