//! Durable sinks
//!
//! A sink is the file a capture writes into. The byte count is always read
//! back from disk so it stays accurate while a capture is still writing.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Destination for a live media stream
#[async_trait]
pub trait DurableSink: Send + Sync {
    /// Path the sink writes to
    fn path(&self) -> &Path;

    /// Append a chunk of media
    async fn write(&self, chunk: &[u8]) -> io::Result<()>;

    /// Bytes persisted so far
    async fn bytes_written(&self) -> io::Result<u64>;

    /// Flush, close and wait until the data is on disk.
    ///
    /// Later writes fail. Flushing twice is a no-op.
    async fn flush(&self) -> io::Result<()>;
}

/// Opens sinks for new sessions
#[async_trait]
pub trait SinkOpener: Send + Sync {
    async fn open(&self, path: &Path) -> io::Result<Arc<dyn DurableSink>>;
}

/// Sink writing straight to a file
pub struct FileSink {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl FileSink {
    /// Create the file, refusing to overwrite an existing one
    pub async fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await?;

        tracing::debug!("Opened sink {:?}", path);

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(Some(file)),
        })
    }
}

#[async_trait]
impl DurableSink for FileSink {
    fn path(&self) -> &Path {
        &self.path
    }

    async fn write(&self, chunk: &[u8]) -> io::Result<()> {
        let mut guard = self.file.lock().await;
        let file = guard
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "sink is closed"))?;
        file.write_all(chunk).await
    }

    async fn bytes_written(&self) -> io::Result<u64> {
        Ok(tokio::fs::metadata(&self.path).await?.len())
    }

    async fn flush(&self) -> io::Result<()> {
        let Some(mut file) = self.file.lock().await.take() else {
            return Ok(());
        };
        file.flush().await?;
        file.sync_all().await?;
        tracing::debug!("Sink {:?} flushed and closed", self.path);
        Ok(())
    }
}

/// Opens [`FileSink`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct FileSinkOpener;

#[async_trait]
impl SinkOpener for FileSinkOpener {
    async fn open(&self, path: &Path) -> io::Result<Arc<dyn DurableSink>> {
        Ok(Arc::new(FileSink::create(path).await?))
    }
}
