//! Fakes for exercising the recorder without a browser

use super::sink::{DurableSink, FileSink, SinkOpener};
use crate::capture::{CaptureError, CaptureHandle, CaptureResult, FaultSender, MediaCapture};
use crate::convert::{ConversionResult, Transcoder};
use crate::registry::schema::VideoQuality;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

pub const FAKE_MEDIA: &[u8] = b"fake-media";

/// Ordered record of calls made on fake handles
#[derive(Debug, Clone, Default)]
pub struct HandleLog {
    calls: Arc<Mutex<Vec<&'static str>>>,
}

impl HandleLog {
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().iter().filter(|c| **c == call).count()
    }

    fn push(&self, call: &'static str) {
        self.calls.lock().push(call);
    }
}

/// Capture handle that writes [`FAKE_MEDIA`] on attach and once more per
/// `feed` notification
pub struct FakeHandle {
    log: HandleLog,
    feed: Arc<Notify>,
    pump: Option<JoinHandle<()>>,
    fail_detach: bool,
    fail_release: bool,
}

impl FakeHandle {
    pub fn new(log: HandleLog) -> Self {
        Self {
            log,
            feed: Arc::new(Notify::new()),
            pump: None,
            fail_detach: false,
            fail_release: false,
        }
    }

    pub fn fed_by(mut self, feed: Arc<Notify>) -> Self {
        self.feed = feed;
        self
    }

    pub fn failing_detach(mut self) -> Self {
        self.fail_detach = true;
        self
    }

    pub fn failing_release(mut self) -> Self {
        self.fail_release = true;
        self
    }

    fn stop_pump(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

#[async_trait]
impl CaptureHandle for FakeHandle {
    async fn attach_sink(
        &mut self,
        sink: Arc<dyn DurableSink>,
        fault: FaultSender,
    ) -> CaptureResult<()> {
        sink.write(FAKE_MEDIA).await?;
        self.log.push("attach");

        let feed = self.feed.clone();
        self.pump = Some(tokio::spawn(async move {
            loop {
                feed.notified().await;
                if let Err(e) = sink.write(FAKE_MEDIA).await {
                    let _ = fault.send(format!("sink write failed: {}", e));
                    return;
                }
            }
        }));
        Ok(())
    }

    async fn detach_sink(&mut self) -> CaptureResult<()> {
        self.log.push("detach");
        self.stop_pump();
        if self.fail_detach {
            return Err(CaptureError::Stream("detach exploded".to_string()));
        }
        Ok(())
    }

    async fn release(&mut self) -> CaptureResult<()> {
        self.log.push("release");
        self.stop_pump();
        if self.fail_release {
            return Err(CaptureError::Stream("release exploded".to_string()));
        }
        Ok(())
    }

    async fn shutdown_host(&mut self) -> CaptureResult<()> {
        self.log.push("shutdown");
        Ok(())
    }
}

impl Drop for FakeHandle {
    fn drop(&mut self) {
        self.stop_pump();
    }
}

#[derive(Debug, Clone, Copy)]
pub enum FakeFailure {
    Launch,
    NavigationTimeout,
    NavigationFailed,
    /// Never return from `acquire`
    Hang,
}

/// Capture backend handing out [`FakeHandle`]s
#[derive(Default)]
pub struct FakeCapture {
    pub log: HandleLog,
    acquired: AtomicUsize,
    failure: Mutex<Option<FakeFailure>>,
    fail_teardown: AtomicBool,
    delay: Mutex<Duration>,
    feed: Arc<Notify>,
}

impl FakeCapture {
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn fail_with(&self, failure: Option<FakeFailure>) {
        *self.failure.lock() = failure;
    }

    pub fn fail_teardown(&self, fail: bool) {
        self.fail_teardown.store(fail, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Have the live handle write one more chunk
    pub fn deliver(&self) {
        self.feed.notify_one();
    }
}

#[async_trait]
impl MediaCapture for FakeCapture {
    fn name(&self) -> &str {
        "fake"
    }

    async fn acquire(
        &self,
        url: &str,
        _quality: &VideoQuality,
        timeout: Duration,
    ) -> CaptureResult<Box<dyn CaptureHandle>> {
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let failure = *self.failure.lock();
        match failure {
            Some(FakeFailure::Launch) => Err(CaptureError::LaunchFailed("no browser".to_string())),
            Some(FakeFailure::NavigationTimeout) => Err(CaptureError::NavigationTimeout(timeout)),
            Some(FakeFailure::NavigationFailed) => {
                Err(CaptureError::NavigationFailed(format!("{} returned 500", url)))
            }
            Some(FakeFailure::Hang) => std::future::pending().await,
            None => {
                self.acquired.fetch_add(1, Ordering::SeqCst);
                let mut handle = FakeHandle::new(self.log.clone()).fed_by(self.feed.clone());
                if self.fail_teardown.load(Ordering::SeqCst) {
                    handle = handle.failing_detach();
                }
                Ok(Box::new(handle))
            }
        }
    }
}

/// File sinks that count opens and closes
#[derive(Clone, Default)]
pub struct CountingSinkOpener {
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
    fail_open: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
}

impl CountingSinkOpener {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Make every write on every sink fail
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SinkOpener for CountingSinkOpener {
    async fn open(&self, path: &Path) -> io::Result<Arc<dyn DurableSink>> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only disk"));
        }
        let inner = FileSink::create(path).await?;
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(CountingSink {
            inner,
            closed: self.closed.clone(),
            fail_writes: self.fail_writes.clone(),
            flushed: AtomicBool::new(false),
        }))
    }
}

struct CountingSink {
    inner: FileSink,
    closed: Arc<AtomicUsize>,
    fail_writes: Arc<AtomicBool>,
    flushed: AtomicBool,
}

#[async_trait]
impl DurableSink for CountingSink {
    fn path(&self) -> &Path {
        self.inner.path()
    }

    async fn write(&self, chunk: &[u8]) -> io::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
        }
        self.inner.write(chunk).await
    }

    async fn bytes_written(&self) -> io::Result<u64> {
        self.inner.bytes_written().await
    }

    async fn flush(&self) -> io::Result<()> {
        self.inner.flush().await?;
        if !self.flushed.swap(true, Ordering::SeqCst) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Converts by copying the source
pub struct CopyTranscoder;

#[async_trait]
impl Transcoder for CopyTranscoder {
    async fn convert(&self, source: &Path, target: &Path) -> ConversionResult<()> {
        tokio::fs::copy(source, target).await?;
        Ok(())
    }
}
