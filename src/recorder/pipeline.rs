//! Capture pipeline
//!
//! Owns one capture handle and one sink for the lifetime of a session.
//! Teardown order lives here so that both resources are always released
//! together, whatever fails along the way.

use super::sink::DurableSink;
use crate::capture::{CaptureError, CaptureHandle, CaptureResult, FaultReceiver};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Stage {
    /// Both resources live, nothing flowing
    Assembled,
    Attached,
    Detached,
    CaptureReleased,
    SinkClosed,
    Closed,
}

/// Teardown steps, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    DetachSink,
    ReleaseCapture,
    FlushSink,
    ShutdownHost,
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TeardownStep::DetachSink => write!(f, "detach-sink"),
            TeardownStep::ReleaseCapture => write!(f, "release-capture"),
            TeardownStep::FlushSink => write!(f, "flush-sink"),
            TeardownStep::ShutdownHost => write!(f, "shutdown-host"),
        }
    }
}

/// First failure seen during a teardown that still ran to the end
#[derive(Error, Debug)]
#[error("teardown step {step} failed: {message}")]
pub struct TeardownFailure {
    pub step: TeardownStep,
    pub message: String,
}

pub struct CapturePipeline {
    capture: Box<dyn CaptureHandle>,
    sink: Arc<dyn DurableSink>,
    stage: Stage,
}

impl CapturePipeline {
    pub fn new(capture: Box<dyn CaptureHandle>, sink: Arc<dyn DurableSink>) -> Self {
        Self {
            capture,
            sink,
            stage: Stage::Assembled,
        }
    }

    /// Start streaming capture output into the sink.
    ///
    /// The receiver yields a reason if delivery stops before teardown, and
    /// closes empty otherwise.
    pub async fn attach(&mut self) -> CaptureResult<FaultReceiver> {
        if self.stage != Stage::Assembled {
            return Err(CaptureError::SinkAlreadyAttached);
        }
        let (fault, faults) = oneshot::channel();
        self.capture.attach_sink(self.sink.clone(), fault).await?;
        self.stage = Stage::Attached;
        Ok(faults)
    }

    pub fn sink(&self) -> &Arc<dyn DurableSink> {
        &self.sink
    }

    pub fn is_closed(&self) -> bool {
        self.stage == Stage::Closed
    }

    /// Error reported by the capture's delivery task, if any
    pub fn last_error(&self) -> Option<String> {
        self.capture.last_error()
    }

    /// Run every teardown step, even after a failure.
    ///
    /// `drain` is slept between releasing the capture and flushing the sink
    /// so that buffered media can land. Calling this again is a no-op.
    pub async fn teardown(&mut self, drain: Duration) -> Result<(), TeardownFailure> {
        if self.stage == Stage::Closed {
            return Ok(());
        }

        let mut first: Option<TeardownFailure> = None;
        let mut record = |step: TeardownStep, message: String| {
            tracing::warn!("Teardown step {} failed for {:?}: {}", step, self.sink.path(), message);
            if first.is_none() {
                first = Some(TeardownFailure { step, message });
            }
        };

        if self.stage == Stage::Attached {
            if let Err(e) = self.capture.detach_sink().await {
                record(TeardownStep::DetachSink, e.to_string());
            }
            self.stage = Stage::Detached;
        }

        if self.stage < Stage::CaptureReleased {
            if let Err(e) = self.capture.release().await {
                record(TeardownStep::ReleaseCapture, e.to_string());
            }
            self.stage = Stage::CaptureReleased;

            if !drain.is_zero() {
                tracing::debug!("Waiting {:?} for buffered data", drain);
                tokio::time::sleep(drain).await;
            }
        }

        if self.stage < Stage::SinkClosed {
            if let Err(e) = self.sink.flush().await {
                record(TeardownStep::FlushSink, e.to_string());
            }
            self.stage = Stage::SinkClosed;
        }

        if let Err(e) = self.capture.shutdown_host().await {
            record(TeardownStep::ShutdownHost, e.to_string());
        }
        self.stage = Stage::Closed;

        match first {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }
}
