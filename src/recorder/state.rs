//! Recording state management
//!
//! Defines the session state machine and the records handed to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Lifecycle state of a recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No session for the stream
    #[default]
    Idle,
    /// Capture host starting, page loading
    Launching,
    /// Media flowing into the sink
    Recording,
    /// Teardown in progress
    Stopping,
    /// Teardown finished cleanly
    Completed,
    /// Start or teardown failed
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }

    /// Whether moving to `next` is a legal transition
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Launching)
                | (Launching, Recording)
                | (Launching, Failed)
                | (Recording, Stopping)
                | (Stopping, Completed)
                | (Stopping, Failed)
        )
    }
}

/// One start-to-stop capture attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSession {
    pub session_id: String,
    pub stream_id: String,
    pub state: SessionState,
    pub source_url: String,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub output_path: PathBuf,
    pub last_error: Option<String>,
}

impl RecordingSession {
    /// Create a session in `Launching`
    pub fn new(session_id: String, stream_id: String, source_url: String, output_path: PathBuf) -> Self {
        Self {
            session_id,
            stream_id,
            state: SessionState::Launching,
            source_url,
            started_at: Utc::now(),
            stopped_at: None,
            output_path,
            last_error: None,
        }
    }

    /// Move to `next`, logging and refusing illegal transitions
    pub fn transition(&mut self, next: SessionState) -> bool {
        if !self.state.can_transition_to(next) {
            tracing::warn!(
                "Ignoring illegal transition {:?} -> {:?} for session {}",
                self.state,
                next,
                self.session_id
            );
            return false;
        }
        tracing::debug!("Session {}: {:?} -> {:?}", self.session_id, self.state, next);
        self.state = next;
        if next.is_terminal() {
            self.stopped_at = Some(Utc::now());
        }
        true
    }

    /// Milliseconds since start, or total duration once stopped
    pub fn duration_ms(&self) -> u64 {
        let end = self.stopped_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds().max(0) as u64
    }
}

/// Point-in-time view of a stream's recording status
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub stream_id: String,
    pub session_id: Option<String>,
    pub state: SessionState,
    pub is_recording: bool,
    pub source_url: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub file_size: u64,
    pub output_path: Option<PathBuf>,
    pub last_error: Option<String>,
}

impl SessionSnapshot {
    /// Snapshot for a stream with no session
    pub fn idle(stream_id: &str) -> Self {
        Self {
            stream_id: stream_id.to_string(),
            session_id: None,
            state: SessionState::Idle,
            is_recording: false,
            source_url: None,
            started_at: None,
            duration_ms: 0,
            file_size: 0,
            output_path: None,
            last_error: None,
        }
    }
}

/// Result of a completed stop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopOutcome {
    pub session_id: String,
    pub stream_id: String,
    pub output_path: PathBuf,
    pub duration_ms: u64,
    pub size_bytes: u64,
}
