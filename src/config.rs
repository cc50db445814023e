//! Process configuration
//!
//! Command-line flags with environment fallbacks. Durable service settings
//! live in the registry file instead.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Record browser-rendered live streams to disk over a small HTTP API.
#[derive(Parser, Debug, Clone)]
#[command(name = "stream-recorder")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Address the HTTP API listens on.
    #[arg(long, env = "STREAM_RECORDER_BIND", default_value = "0.0.0.0:3000")]
    pub bind: SocketAddr,

    /// Registry file holding streams and settings. Created if missing.
    #[arg(long, env = "STREAM_RECORDER_CONFIG", default_value = "config.json")]
    pub config: PathBuf,

    /// Bearer token required on every route except /health.
    #[arg(long, env = "STREAM_RECORDER_API_TOKEN", hide_env_values = true)]
    pub api_token: Option<String>,

    /// Browser-capture helper. Loads the page and writes media to stdout.
    #[arg(long, env = "STREAM_RECORDER_CAPTURE_PROGRAM", default_value = "stream-capture")]
    pub capture_program: String,

    /// Argument template for the capture helper, repeatable. Supports
    /// {url} {width} {height} {video_bitrate} {audio_bitrate}.
    #[arg(long = "capture-arg", allow_hyphen_values = true)]
    pub capture_args: Vec<String>,

    /// ffmpeg binary used for conversions.
    #[arg(long, env = "STREAM_RECORDER_FFMPEG", default_value = "ffmpeg")]
    pub ffmpeg: String,

    /// ffprobe binary used for technical metadata.
    #[arg(long, env = "STREAM_RECORDER_FFPROBE", default_value = "ffprobe")]
    pub ffprobe: String,
}

impl Cli {
    /// Token to enforce, ignoring an empty value
    pub fn api_token(&self) -> Option<&str> {
        self.api_token.as_deref().filter(|t| !t.is_empty())
    }
}
