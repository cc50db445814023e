//! Process-backed capture
//!
//! Runs an external browser-capture helper that loads the page and writes
//! the encoded media stream to its stdout. The first byte on stdout marks a
//! successful navigation.

use super::traits::{CaptureError, CaptureHandle, CaptureResult, FaultSender, MediaCapture};
use crate::recorder::sink::DurableSink;
use crate::registry::schema::VideoQuality;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const READ_CHUNK: usize = 64 * 1024;

/// How long the host gets to exit after being killed
const HOST_EXIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Stderr lines kept for error messages
const STDERR_TAIL_LINES: usize = 5;

/// How long to wait for stderr to drain after the host exited
const STDERR_SETTLE: Duration = Duration::from_millis(500);

/// Capture backend that spawns one helper process per session
#[derive(Debug, Clone)]
pub struct ProcessCapture {
    program: String,
    args: Vec<String>,
}

impl ProcessCapture {
    /// Create a backend for `program`.
    ///
    /// `args` may contain the placeholders `{url}`, `{width}`, `{height}`,
    /// `{video_bitrate}` and `{audio_bitrate}`.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    fn render_args(&self, url: &str, quality: &VideoQuality) -> Vec<String> {
        if self.args.is_empty() {
            return vec![url.to_string()];
        }

        self.args
            .iter()
            .map(|arg| {
                arg.replace("{url}", url)
                    .replace("{width}", &quality.width.to_string())
                    .replace("{height}", &quality.height.to_string())
                    .replace("{video_bitrate}", &quality.video_bitrate.to_string())
                    .replace("{audio_bitrate}", &quality.audio_bitrate.to_string())
            })
            .collect()
    }
}

#[async_trait]
impl MediaCapture for ProcessCapture {
    fn name(&self) -> &str {
        &self.program
    }

    async fn acquire(
        &self,
        url: &str,
        quality: &VideoQuality,
        timeout: Duration,
    ) -> CaptureResult<Box<dyn CaptureHandle>> {
        let args = self.render_args(url, quality);
        tracing::info!("Launching capture host: {} {:?}", self.program, args);

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CaptureError::LaunchFailed(format!("{}: {}", self.program, e)))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| CaptureError::LaunchFailed("capture host has no stdout".to_string()))?;
        let mut stderr = match child.stderr.take() {
            Some(stderr) => StderrTail::follow(stderr),
            None => StderrTail::empty(),
        };

        tracing::debug!("Waiting up to {:?} for media from {}", timeout, url);

        let mut first = vec![0u8; READ_CHUNK];
        let read = match tokio::time::timeout(timeout, stdout.read(&mut first)).await {
            Ok(read) => read,
            Err(_) => {
                let _ = child.start_kill();
                let tail = stderr.lines.render();
                if !tail.is_empty() {
                    tracing::warn!("Capture host timed out on {}: {}", url, tail);
                }
                return Err(CaptureError::NavigationTimeout(timeout));
            }
        };

        match read {
            Ok(0) => {
                let status = child.wait().await?;
                let tail = stderr.settle().await;
                Err(CaptureError::NavigationFailed(with_tail(
                    format!("capture host exited before producing media ({})", status),
                    &tail,
                )))
            }
            Ok(n) => {
                first.truncate(n);
                tracing::info!("Media flowing from {} ({} initial bytes)", url, n);
                Ok(Box::new(ProcessCaptureHandle {
                    child: Some(child),
                    reader: Some(stdout),
                    pending: first,
                    pump: None,
                    last_error: Arc::new(Mutex::new(None)),
                    stderr,
                }))
            }
            Err(e) => {
                let _ = child.start_kill();
                let tail = stderr.settle().await;
                Err(CaptureError::NavigationFailed(with_tail(e.to_string(), &tail)))
            }
        }
    }
}

fn with_tail(message: String, tail: &str) -> String {
    if tail.is_empty() {
        message
    } else {
        format!("{}: {}", message, tail)
    }
}

/// Last few stderr lines of the capture host
#[derive(Clone, Default)]
struct TailLines(Arc<Mutex<VecDeque<String>>>);

impl TailLines {
    fn push(&self, line: String) {
        let mut lines = self.0.lock();
        if lines.len() == STDERR_TAIL_LINES {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    fn render(&self) -> String {
        self.0.lock().iter().cloned().collect::<Vec<_>>().join(" | ")
    }
}

/// Logs the host's stderr and remembers its tail
struct StderrTail {
    lines: TailLines,
    task: Option<JoinHandle<()>>,
}

impl StderrTail {
    fn follow(stderr: ChildStderr) -> Self {
        let lines = TailLines::default();
        let sink = lines.clone();
        let task = tokio::spawn(async move {
            let mut reader = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                tracing::debug!(target: "capture_host", "{}", line);
                sink.push(line);
            }
        });
        Self {
            lines,
            task: Some(task),
        }
    }

    fn empty() -> Self {
        Self {
            lines: TailLines::default(),
            task: None,
        }
    }

    /// Give the reader a moment to drain a closed pipe, then render
    async fn settle(&mut self) -> String {
        if let Some(task) = self.task.as_mut() {
            let _ = tokio::time::timeout(STDERR_SETTLE, task).await;
        }
        self.lines.render()
    }
}

impl Drop for StderrTail {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Background task copying stdout into the sink
struct Pump {
    stop: oneshot::Sender<()>,
    task: JoinHandle<ChildStdout>,
}

/// Live capture backed by a helper process
pub struct ProcessCaptureHandle {
    child: Option<Child>,
    reader: Option<ChildStdout>,
    /// Bytes read while waiting for navigation, not yet delivered
    pending: Vec<u8>,
    pump: Option<Pump>,
    last_error: Arc<Mutex<Option<String>>>,
    stderr: StderrTail,
}

/// Copy the host's stdout into `sink` until told to stop.
///
/// Returns why delivery ended if it ended on its own.
async fn deliver(
    reader: &mut ChildStdout,
    pending: &[u8],
    sink: &dyn DurableSink,
    stop_rx: &mut oneshot::Receiver<()>,
) -> Option<String> {
    if !pending.is_empty() {
        if let Err(e) = sink.write(pending).await {
            tracing::error!("Sink write failed for {:?}: {}", sink.path(), e);
            return Some(format!("sink write failed: {}", e));
        }
    }

    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        tokio::select! {
            _ = &mut *stop_rx => return None,
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    tracing::warn!("Capture stream for {:?} ended", sink.path());
                    return Some("capture stream ended".to_string());
                }
                Ok(n) => {
                    if let Err(e) = sink.write(&buf[..n]).await {
                        tracing::error!("Sink write failed for {:?}: {}", sink.path(), e);
                        return Some(format!("sink write failed: {}", e));
                    }
                }
                Err(e) => {
                    tracing::error!("Capture stream error: {}", e);
                    return Some(format!("capture stream error: {}", e));
                }
            }
        }
    }
}

#[async_trait]
impl CaptureHandle for ProcessCaptureHandle {
    async fn attach_sink(
        &mut self,
        sink: Arc<dyn DurableSink>,
        fault: FaultSender,
    ) -> CaptureResult<()> {
        if self.pump.is_some() {
            return Err(CaptureError::SinkAlreadyAttached);
        }
        let mut reader = self.reader.take().ok_or(CaptureError::Released)?;
        let pending = std::mem::take(&mut self.pending);
        let last_error = self.last_error.clone();
        let stderr = self.stderr.lines.clone();
        let (stop, mut stop_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            if let Some(reason) = deliver(&mut reader, &pending, sink.as_ref(), &mut stop_rx).await {
                let reason = with_tail(reason, &stderr.render());
                *last_error.lock() = Some(reason.clone());
                let _ = fault.send(reason);
            }
            reader
        });

        self.pump = Some(Pump { stop, task });
        Ok(())
    }

    async fn detach_sink(&mut self) -> CaptureResult<()> {
        let Some(pump) = self.pump.take() else {
            return Ok(());
        };

        // The task may already have exited on its own
        let _ = pump.stop.send(());
        let reader = pump
            .task
            .await
            .map_err(|e| CaptureError::Stream(format!("delivery task failed: {}", e)))?;
        self.reader = Some(reader);
        Ok(())
    }

    async fn release(&mut self) -> CaptureResult<()> {
        if let Some(pump) = self.pump.take() {
            pump.task.abort();
        }
        self.reader = None;
        self.pending.clear();
        Ok(())
    }

    async fn shutdown_host(&mut self) -> CaptureResult<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        if let Some(status) = child.try_wait()? {
            tracing::debug!("Capture host already exited ({})", status);
            return Ok(());
        }

        child.start_kill()?;
        match tokio::time::timeout(HOST_EXIT_TIMEOUT, child.wait()).await {
            Ok(status) => {
                tracing::debug!("Capture host exited ({})", status?);
                Ok(())
            }
            Err(_) => Err(CaptureError::Stream(
                "capture host did not exit after kill".to_string(),
            )),
        }
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }
}

impl Drop for ProcessCaptureHandle {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.task.abort();
        }
    }
}
