//! Capture trait definitions
//!
//! Backend-agnostic traits for acquiring a live audio/video byte stream
//! from a page URL. The browser automation itself lives behind these.

use crate::recorder::sink::DurableSink;
use crate::registry::schema::VideoQuality;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors that can occur while acquiring or driving a capture
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Failed to launch capture host: {0}")]
    LaunchFailed(String),

    #[error("Timed out after {0:?} waiting for the source page")]
    NavigationTimeout(Duration),

    #[error("Failed to load source page: {0}")]
    NavigationFailed(String),

    #[error("Sink already attached")]
    SinkAlreadyAttached,

    #[error("Capture already released")]
    Released,

    #[error("Capture stream error: {0}")]
    Stream(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CaptureError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            CaptureError::LaunchFailed(_) => "LAUNCH_FAILED",
            CaptureError::NavigationTimeout(_) => "NAVIGATION_TIMEOUT",
            CaptureError::NavigationFailed(_) => "NAVIGATION_FAILED",
            CaptureError::SinkAlreadyAttached | CaptureError::Released => "CAPTURE_STATE",
            CaptureError::Stream(_) => "CAPTURE_STREAM",
            CaptureError::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type for capture operations
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Carries the reason a delivery task stopped without being detached.
/// Dropped unsent when delivery ends through `detach_sink` or `release`.
pub type FaultSender = oneshot::Sender<String>;

pub type FaultReceiver = oneshot::Receiver<String>;

/// Something that can turn a URL into a live media stream
#[async_trait]
pub trait MediaCapture: Send + Sync {
    /// Short backend name used in logs
    fn name(&self) -> &str;

    /// Launch the capture host, load `url` and wait until media starts flowing.
    ///
    /// Must give up with `NavigationTimeout` once `timeout` has elapsed.
    async fn acquire(
        &self,
        url: &str,
        quality: &VideoQuality,
        timeout: Duration,
    ) -> CaptureResult<Box<dyn CaptureHandle>>;
}

/// A live capture acquired from a [`MediaCapture`]
///
/// Teardown is split into three calls so that the owner controls the order:
/// `detach_sink` stops delivering bytes, `release` ends the media stream and
/// `shutdown_host` closes whatever process hosted the page.
#[async_trait]
pub trait CaptureHandle: Send + Sync {
    /// Start delivering media bytes into `sink` in the background.
    ///
    /// If delivery ends on its own (source closed, sink write failed) the
    /// reason goes to `fault`.
    async fn attach_sink(
        &mut self,
        sink: Arc<dyn DurableSink>,
        fault: FaultSender,
    ) -> CaptureResult<()>;

    /// Stop delivering bytes to the attached sink. No-op if nothing is attached.
    async fn detach_sink(&mut self) -> CaptureResult<()>;

    /// Tear down the media stream
    async fn release(&mut self) -> CaptureResult<()>;

    /// Close the hosting process. Defaults to nothing for hosts that
    /// `release` already shuts down.
    async fn shutdown_host(&mut self) -> CaptureResult<()> {
        Ok(())
    }

    /// Last error reported by the background delivery task, if any
    fn last_error(&self) -> Option<String> {
        None
    }
}
