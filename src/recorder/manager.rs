//! Session manager
//!
//! Owns every live recording session. Start and stop for one stream are
//! mutually exclusive; different streams never wait on each other.

use super::error::{RecorderError, RecorderResult};
use super::naming;
use super::pipeline::CapturePipeline;
use super::sink::{DurableSink, SinkOpener};
use super::state::{RecordingSession, SessionSnapshot, SessionState, StopOutcome};
use crate::capture::{CaptureError, CaptureHandle, FaultReceiver, MediaCapture};
use crate::convert::{ConversionCoordinator, EnqueueOutcome};
use crate::registry::schema::{
    LastRecording, RecordingOutcome, RecordingStateRecord, Settings, StreamDescriptor,
    VideoQuality,
};
use crate::registry::StreamRegistry;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events emitted as sessions move through their lifecycle
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Started {
        stream_id: String,
        session_id: String,
    },
    Stopped {
        stream_id: String,
        session_id: String,
        outcome: RecordingOutcome,
    },
    StartFailed {
        stream_id: String,
        error: String,
    },
}

/// Tunables the manager reads from settings at construction
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub recordings_dir: PathBuf,
    pub quality: VideoQuality,
    pub navigation_timeout: Duration,
    pub drain_delay: Duration,
    pub auto_convert: bool,
}

impl ManagerOptions {
    pub fn from_settings(settings: &Settings, recordings_dir: PathBuf) -> Self {
        Self {
            recordings_dir,
            quality: settings.default_video_quality.clone(),
            navigation_timeout: Duration::from_secs(settings.navigation_timeout_secs),
            drain_delay: Duration::from_millis(settings.drain_delay_ms),
            auto_convert: settings.auto_convert,
        }
    }
}

struct SessionEntry {
    session: RecordingSession,
    /// Present while `Recording`; taken by stop
    pipeline: Option<CapturePipeline>,
    sink: Option<Arc<dyn DurableSink>>,
}

#[derive(Default)]
struct SessionIndex {
    /// At most one entry per stream, in any non-terminal state
    by_stream: HashMap<String, SessionEntry>,
    /// Sessions that can be stopped
    by_session: HashMap<String, String>,
    /// Streams being deleted from the registry; they take no new sessions
    removing: HashSet<String>,
}

/// Refuses starts for a stream until dropped
struct RemovalMark<'a> {
    index: &'a Mutex<SessionIndex>,
    stream_id: String,
}

impl Drop for RemovalMark<'_> {
    fn drop(&mut self) {
        self.index.lock().removing.remove(&self.stream_id);
    }
}

impl SessionIndex {
    /// Remove the stream's entry if it still belongs to `session_id`
    fn remove_if(&mut self, stream_id: &str, session_id: &str) -> Option<SessionEntry> {
        let owned = self
            .by_stream
            .get(stream_id)
            .is_some_and(|e| e.session.session_id == session_id);
        if !owned {
            return None;
        }
        self.by_session.remove(session_id);
        self.by_stream.remove(stream_id)
    }
}

pub struct SessionManager {
    registry: Arc<StreamRegistry>,
    capture: Arc<dyn MediaCapture>,
    sinks: Arc<dyn SinkOpener>,
    conversions: Option<Arc<ConversionCoordinator>>,
    options: ManagerOptions,
    index: Mutex<SessionIndex>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl SessionManager {
    pub fn new(
        registry: Arc<StreamRegistry>,
        capture: Arc<dyn MediaCapture>,
        sinks: Arc<dyn SinkOpener>,
        options: ManagerOptions,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            registry,
            capture,
            sinks,
            conversions: None,
            options,
            index: Mutex::new(SessionIndex::default()),
            event_tx,
        }
    }

    /// Queue finished recordings on `conversions` when auto-convert is on
    pub fn with_conversions(mut self, conversions: Arc<ConversionCoordinator>) -> Self {
        self.conversions = Some(conversions);
        self
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        // No receivers is fine
        let _ = self.event_tx.send(event);
    }

    /// Start recording `stream_id` and return the new session id.
    ///
    /// A failed start leaves no session, no registry pointer and no output
    /// file behind. Once the stream is reserved the launch runs on its own
    /// task, so dropping the returned future does not strand the
    /// reservation: the launch still ends in `Recording` or is rolled back.
    pub async fn start(self: &Arc<Self>, stream_id: &str) -> RecorderResult<String> {
        let stream = self.registry.get(stream_id).await?;
        if stream.source_url.trim().is_empty() {
            return Err(RecorderError::StreamNotFound(stream_id.to_string()));
        }

        let session_id = Uuid::new_v4().simple().to_string();
        let mut session = RecordingSession::new(
            session_id.clone(),
            stream_id.to_string(),
            stream.source_url.clone(),
            PathBuf::new(),
        );
        session.output_path = naming::output_path(
            &self.options.recordings_dir,
            &stream.display_name,
            session.started_at,
            &session_id,
        );

        {
            let mut index = self.index.lock();
            if index.removing.contains(stream_id) {
                return Err(RecorderError::StreamNotFound(stream_id.to_string()));
            }
            if let Some(existing) = index.by_stream.get(stream_id) {
                return Err(RecorderError::SessionConflict {
                    stream_id: stream_id.to_string(),
                    session_id: existing.session.session_id.clone(),
                });
            }
            index.by_stream.insert(
                stream_id.to_string(),
                SessionEntry {
                    session: session.clone(),
                    pipeline: None,
                    sink: None,
                },
            );
        }

        tracing::info!(
            "Starting recording of '{}' ({}) into {:?}",
            stream.display_name,
            stream_id,
            session.output_path
        );

        let manager = Arc::clone(self);
        let task = tokio::spawn(async move { manager.complete_start(stream, session).await });
        match task.await {
            Ok(result) => result,
            Err(e) => {
                self.index.lock().remove_if(stream_id, &session_id);
                Err(RecorderError::Interrupted(e.to_string()))
            }
        }
    }

    /// Launch a reserved session and either register it as recording or
    /// drop the reservation
    async fn complete_start(
        self: Arc<Self>,
        stream: StreamDescriptor,
        mut session: RecordingSession,
    ) -> RecorderResult<String> {
        let stream_id = session.stream_id.clone();
        let session_id = session.session_id.clone();

        let (pipeline, faults) = match self.launch(&stream, &session).await {
            Ok(launched) => launched,
            Err(e) => {
                session.transition(SessionState::Failed);
                self.index.lock().remove_if(&stream_id, &session_id);
                tracing::error!("Failed to start recording of {}: {}", stream_id, e);
                self.emit(SessionEvent::StartFailed {
                    stream_id,
                    error: e.to_string(),
                });
                return Err(e);
            }
        };

        {
            let sink = pipeline.sink().clone();
            let mut guard = self.index.lock();
            let index = &mut *guard;
            match index.by_stream.get_mut(&stream_id) {
                Some(entry) if entry.session.session_id == session_id => {
                    entry.session.transition(SessionState::Recording);
                    entry.pipeline = Some(pipeline);
                    entry.sink = Some(sink);
                    index.by_session.insert(session_id.clone(), stream_id.clone());
                }
                _ => {
                    // Only start itself removes a Launching reservation
                    tracing::error!("Reservation for session {} vanished", session_id);
                }
            }
        }
        self.watch_delivery(session_id.clone(), faults);

        tracing::info!("Recording session {} started for {}", session_id, stream_id);
        self.emit(SessionEvent::Started {
            stream_id,
            session_id: session_id.clone(),
        });
        Ok(session_id)
    }

    /// Acquire the capture, open the sink, attach them and persist the
    /// active pointer. Everything acquired is released again on failure.
    async fn launch(
        &self,
        stream: &StreamDescriptor,
        session: &RecordingSession,
    ) -> RecorderResult<(CapturePipeline, FaultReceiver)> {
        let timeout = self.options.navigation_timeout;
        let acquired = tokio::time::timeout(
            timeout,
            self.capture
                .acquire(&stream.source_url, &self.options.quality, timeout),
        )
        .await;
        let mut capture = match acquired {
            Ok(result) => result?,
            Err(_) => return Err(CaptureError::NavigationTimeout(timeout).into()),
        };

        if let Err(e) = tokio::fs::create_dir_all(&self.options.recordings_dir).await {
            release_unattached(&mut capture).await;
            return Err(RecorderError::Sink(e));
        }

        let sink = match self.sinks.open(&session.output_path).await {
            Ok(sink) => sink,
            Err(e) => {
                release_unattached(&mut capture).await;
                return Err(RecorderError::Sink(e));
            }
        };

        let mut pipeline = CapturePipeline::new(capture, sink);
        let faults = match pipeline.attach().await {
            Ok(faults) => faults,
            Err(e) => {
                abandon(&mut pipeline, &session.output_path).await;
                return Err(e.into());
            }
        };

        let record = RecordingStateRecord {
            session_id: session.session_id.clone(),
            started_at: session.started_at,
            output_path: session.output_path.clone(),
        };
        if let Err(e) = self
            .registry
            .set_recording_state(&session.stream_id, Some(record))
            .await
        {
            abandon(&mut pipeline, &session.output_path).await;
            return Err(e.into());
        }

        Ok((pipeline, faults))
    }

    /// End the session when its capture stops delivering on its own
    fn watch_delivery(self: &Arc<Self>, session_id: String, faults: FaultReceiver) {
        let manager = Arc::downgrade(self);
        tokio::spawn(async move {
            // Closes without a value when the session is torn down normally
            let Ok(reason) = faults.await else {
                return;
            };
            let Some(manager) = manager.upgrade() else {
                return;
            };
            tracing::error!("Recording session {} lost its capture: {}", session_id, reason);
            let Ok((session, pipeline)) = manager.begin_stop(&session_id) else {
                // a stop is already tearing it down
                return;
            };
            if let Err(e) = manager.finish_stop(session, pipeline, Some(reason)).await {
                tracing::warn!("Cleanup of session {} reported: {}", session_id, e);
            }
        });
    }

    /// Stop a recording session.
    ///
    /// Teardown always runs to completion and the session always leaves the
    /// index; only the first failure is returned. Teardown runs on its own
    /// task and finishes even if the returned future is dropped.
    pub async fn stop(self: &Arc<Self>, session_id: &str) -> RecorderResult<StopOutcome> {
        let (session, pipeline) = self.begin_stop(session_id)?;
        let stream_id = session.stream_id.clone();

        let manager = Arc::clone(self);
        let task =
            tokio::spawn(async move { manager.finish_stop(session, pipeline, None).await });
        match task.await {
            Ok(result) => result,
            Err(e) => {
                self.index.lock().remove_if(&stream_id, session_id);
                Err(RecorderError::Interrupted(e.to_string()))
            }
        }
    }

    /// Move a recording session to `Stopping` and take its pipeline
    fn begin_stop(
        &self,
        session_id: &str,
    ) -> RecorderResult<(RecordingSession, Option<CapturePipeline>)> {
        let mut guard = self.index.lock();
        let index = &mut *guard;
        let stream_id = index
            .by_session
            .get(session_id)
            .cloned()
            .ok_or_else(|| RecorderError::SessionNotFound(session_id.to_string()))?;
        let entry = index
            .by_stream
            .get_mut(&stream_id)
            .filter(|e| {
                e.session.session_id == session_id && e.session.state == SessionState::Recording
            })
            .ok_or_else(|| RecorderError::SessionNotFound(session_id.to_string()))?;

        entry.session.transition(SessionState::Stopping);
        let taken = (entry.session.clone(), entry.pipeline.take());
        index.by_session.remove(session_id);
        Ok(taken)
    }

    /// Tear down, record the terminal state and drop the session.
    ///
    /// `fault` marks a session that ended because delivery failed.
    async fn finish_stop(
        &self,
        mut session: RecordingSession,
        pipeline: Option<CapturePipeline>,
        fault: Option<String>,
    ) -> RecorderResult<StopOutcome> {
        let session_id = session.session_id.clone();
        tracing::info!("Stopping recording session {} of {}", session_id, session.stream_id);

        let mut first_error: Option<RecorderError> = None;
        if let Some(mut pipeline) = pipeline {
            if let Err(failure) = pipeline.teardown(self.options.drain_delay).await {
                first_error = Some(failure.into());
            }
        }

        let size_bytes = match tokio::fs::metadata(&session.output_path).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                tracing::warn!("Could not stat {:?}: {}", session.output_path, e);
                0
            }
        };

        let failure = first_error.as_ref().map(|e| e.to_string()).or(fault);
        let outcome = if failure.is_none() {
            RecordingOutcome::Completed
        } else {
            RecordingOutcome::Failed
        };
        if let Some(reason) = failure {
            session.last_error = Some(reason);
            session.transition(SessionState::Failed);
        } else {
            session.transition(SessionState::Completed);
        }
        let stopped_at = session.stopped_at.unwrap_or_else(chrono::Utc::now);
        let duration_ms = session.duration_ms();

        let last = LastRecording {
            session_id: session_id.clone(),
            output_path: session.output_path.clone(),
            started_at: session.started_at,
            stopped_at,
            duration_ms,
            size_bytes,
            outcome,
            error: session.last_error.clone(),
        };
        if let Err(e) = self.registry.finish_recording(&session.stream_id, last).await {
            tracing::error!("Failed to persist end of session {}: {}", session_id, e);
            if first_error.is_none() {
                first_error = Some(e.into());
            }
        }

        self.index.lock().remove_if(&session.stream_id, &session_id);

        tracing::info!(
            "Recording session {} stopped: {} ms, {} bytes, {:?}",
            session_id,
            duration_ms,
            size_bytes,
            outcome
        );
        self.emit(SessionEvent::Stopped {
            stream_id: session.stream_id.clone(),
            session_id: session_id.clone(),
            outcome,
        });

        if let Some(e) = first_error {
            return Err(e);
        }

        if self.options.auto_convert && outcome == RecordingOutcome::Completed {
            self.queue_conversion(&session.output_path).await;
        }

        Ok(StopOutcome {
            session_id: session.session_id,
            stream_id: session.stream_id,
            output_path: session.output_path,
            duration_ms,
            size_bytes,
        })
    }

    /// Delete a stream from the registry.
    ///
    /// Refused with `SessionConflict` while the stream has a session in any
    /// state. Starts for the stream fail with `StreamNotFound` until the
    /// removal is done; a second concurrent removal does too.
    pub async fn remove_stream(&self, stream_id: &str) -> RecorderResult<()> {
        let _mark = {
            let mut index = self.index.lock();
            if let Some(existing) = index.by_stream.get(stream_id) {
                return Err(RecorderError::SessionConflict {
                    stream_id: stream_id.to_string(),
                    session_id: existing.session.session_id.clone(),
                });
            }
            if !index.removing.insert(stream_id.to_string()) {
                return Err(RecorderError::StreamNotFound(stream_id.to_string()));
            }
            RemovalMark {
                index: &self.index,
                stream_id: stream_id.to_string(),
            }
        };

        self.registry.remove(stream_id).await?;
        Ok(())
    }

    async fn queue_conversion(&self, path: &Path) {
        let Some(conversions) = &self.conversions else {
            return;
        };
        match conversions.enqueue(path).await {
            Ok(EnqueueOutcome::Queued(_)) => tracing::info!("Queued auto-conversion of {:?}", path),
            Ok(EnqueueOutcome::AlreadyConverted { target_path }) => {
                tracing::debug!("{:?} already converted to {:?}", path, target_path)
            }
            Err(e) => tracing::warn!("Auto-conversion of {:?} not queued: {}", path, e),
        }
    }

    /// Status of a stream. Clears a persisted pointer that names a session
    /// this process no longer runs.
    pub async fn status(&self, stream_id: &str) -> RecorderResult<SessionSnapshot> {
        if let Some(snapshot) = self.live_snapshot(stream_id).await {
            return Ok(snapshot);
        }

        let stream = self.registry.get(stream_id).await?;
        if let Some(record) = stream.recording_state {
            let still_live = self
                .index
                .lock()
                .by_stream
                .get(stream_id)
                .is_some_and(|e| e.session.session_id == record.session_id);
            if still_live {
                if let Some(snapshot) = self.live_snapshot(stream_id).await {
                    return Ok(snapshot);
                }
            } else if self
                .registry
                .clear_recording_state_if(stream_id, &record.session_id)
                .await?
            {
                tracing::warn!(
                    "Cleared stale recording state of {} (session {})",
                    stream_id,
                    record.session_id
                );
            }
        }

        Ok(SessionSnapshot::idle(stream_id))
    }

    /// Status of one live session, looked up by its id
    pub async fn session_status(&self, session_id: &str) -> RecorderResult<SessionSnapshot> {
        let stream_id = {
            let index = self.index.lock();
            index
                .by_stream
                .iter()
                .find(|(_, e)| e.session.session_id == session_id)
                .map(|(stream_id, _)| stream_id.clone())
        };
        match stream_id {
            Some(stream_id) => self
                .live_snapshot(&stream_id)
                .await
                .ok_or_else(|| RecorderError::SessionNotFound(session_id.to_string())),
            None => Err(RecorderError::SessionNotFound(session_id.to_string())),
        }
    }

    /// Snapshots of every live session
    pub async fn list_active(&self) -> Vec<SessionSnapshot> {
        let stream_ids: Vec<String> = self.index.lock().by_stream.keys().cloned().collect();
        let mut snapshots = Vec::with_capacity(stream_ids.len());
        for stream_id in stream_ids {
            if let Some(snapshot) = self.live_snapshot(&stream_id).await {
                snapshots.push(snapshot);
            }
        }
        snapshots.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        snapshots
    }

    /// Whether the stream has a session in any non-terminal state
    pub fn is_active(&self, stream_id: &str) -> bool {
        self.active_session(stream_id).is_some()
    }

    /// Id of the stream's live session, if any
    pub fn active_session(&self, stream_id: &str) -> Option<String> {
        self.index
            .lock()
            .by_stream
            .get(stream_id)
            .map(|e| e.session.session_id.clone())
    }

    /// Output files of every live session
    pub fn active_output_paths(&self) -> Vec<PathBuf> {
        self.index
            .lock()
            .by_stream
            .values()
            .map(|e| e.session.output_path.clone())
            .collect()
    }

    /// Stop every session that is recording. Used on shutdown.
    pub async fn stop_all(self: &Arc<Self>) {
        let session_ids: Vec<String> = self.index.lock().by_session.keys().cloned().collect();
        if session_ids.is_empty() {
            return;
        }
        tracing::info!("Stopping {} active recording(s)", session_ids.len());
        for session_id in session_ids {
            if let Err(e) = self.stop(&session_id).await {
                tracing::error!("Failed to stop session {}: {}", session_id, e);
            }
        }
    }

    async fn live_snapshot(&self, stream_id: &str) -> Option<SessionSnapshot> {
        let (session, sink, capture_error) = {
            let index = self.index.lock();
            let entry = index.by_stream.get(stream_id)?;
            (
                entry.session.clone(),
                entry.sink.clone(),
                entry.pipeline.as_ref().and_then(|p| p.last_error()),
            )
        };

        let file_size = match sink {
            Some(sink) => sink.bytes_written().await.unwrap_or(0),
            None => 0,
        };

        Some(SessionSnapshot {
            stream_id: session.stream_id.clone(),
            session_id: Some(session.session_id.clone()),
            state: session.state,
            is_recording: session.state == SessionState::Recording,
            source_url: Some(session.source_url.clone()),
            started_at: Some(session.started_at),
            duration_ms: session.duration_ms(),
            file_size,
            output_path: Some(session.output_path.clone()),
            last_error: session.last_error.clone().or(capture_error),
        })
    }
}

/// Release a capture that never had a sink attached
async fn release_unattached(capture: &mut Box<dyn CaptureHandle>) {
    if let Err(e) = capture.release().await {
        tracing::warn!("Failed to release capture: {}", e);
    }
    if let Err(e) = capture.shutdown_host().await {
        tracing::warn!("Failed to shut down capture host: {}", e);
    }
}

/// Tear down a pipeline from a failed start and drop its output file
async fn abandon(pipeline: &mut CapturePipeline, output_path: &Path) {
    if let Err(failure) = pipeline.teardown(Duration::ZERO).await {
        tracing::warn!("Cleanup after failed start: {}", failure);
    }
    if let Err(e) = tokio::fs::remove_file(output_path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Failed to remove {:?}: {}", output_path, e);
        }
    }
}
