//! Conversion coordinator
//!
//! Tracks at most one conversion job per source file and runs jobs on the
//! tokio runtime, bounded by a semaphore.

use super::ffmpeg::Transcoder;
use super::types::{
    ConversionError, ConversionJob, ConversionResult, ConversionState, ConversionStatus,
};
use crate::library::sidecar_path;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Expected target size as a fraction of the source size (numerator, denominator).
///
/// Empirical: x264 at the default presets comes out around 1.5x a WebM
/// capture of the same content. Progress built on this is an estimate only.
const TARGET_SIZE_RATIO: (u64, u64) = (3, 2);

/// Estimate how far a conversion is from the partial target's size.
///
/// Never reports 100; a job is only done once it leaves the index.
pub fn estimate_progress(source_size: u64, target_size: u64) -> u8 {
    let estimated = source_size.saturating_mul(TARGET_SIZE_RATIO.0) / TARGET_SIZE_RATIO.1;
    if estimated == 0 {
        return 0;
    }
    let percent = target_size.saturating_mul(100) / estimated;
    percent.min(99) as u8
}

/// Handle to a queued conversion
pub struct ConversionTicket {
    pub source_path: PathBuf,
    pub target_path: PathBuf,
    handle: JoinHandle<ConversionResult<PathBuf>>,
}

impl ConversionTicket {
    /// Wait for the conversion to finish
    pub async fn wait(self) -> ConversionResult<PathBuf> {
        self.handle
            .await
            .map_err(|e| ConversionError::TranscodeFailed(format!("conversion task failed: {}", e)))?
    }
}

/// Result of asking for a conversion
pub enum EnqueueOutcome {
    Queued(ConversionTicket),
    /// The target already exists and no job is running
    AlreadyConverted { target_path: PathBuf },
}

type JobIndex = Arc<Mutex<HashMap<PathBuf, ConversionJob>>>;

pub struct ConversionCoordinator {
    transcoder: Arc<dyn Transcoder>,
    jobs: JobIndex,
    permits: Arc<Semaphore>,
}

impl ConversionCoordinator {
    pub fn new(transcoder: Arc<dyn Transcoder>, max_concurrent: usize) -> Self {
        Self {
            transcoder,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Queue a conversion of `source`.
    ///
    /// Returns as soon as the job is queued; the work runs in the background.
    pub async fn enqueue(&self, source: &Path) -> ConversionResult<EnqueueOutcome> {
        self.check_not_queued(source)?;

        let target = self.transcoder.target_path(source);
        if tokio::fs::try_exists(&target).await? {
            return Ok(EnqueueOutcome::AlreadyConverted { target_path: target });
        }

        let source_size_bytes = match tokio::fs::metadata(source).await {
            Ok(meta) if meta.is_file() => meta.len(),
            Ok(_) => return Err(ConversionError::SourceNotFound(source.to_path_buf())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConversionError::SourceNotFound(source.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };

        {
            let mut jobs = self.jobs.lock();
            if let Some(job) = jobs.get(source) {
                return Err(duplicate_error(job));
            }
            jobs.insert(
                source.to_path_buf(),
                ConversionJob {
                    source_path: source.to_path_buf(),
                    target_path: target.clone(),
                    state: ConversionState::Queued,
                    queued_at: Utc::now(),
                    started_at: None,
                    source_size_bytes,
                },
            );
        }

        tracing::info!("Queued conversion {:?} -> {:?}", source, target);

        let handle = tokio::spawn(run_job(
            self.jobs.clone(),
            self.transcoder.clone(),
            self.permits.clone(),
            source.to_path_buf(),
            target.clone(),
        ));

        Ok(EnqueueOutcome::Queued(ConversionTicket {
            source_path: source.to_path_buf(),
            target_path: target,
            handle,
        }))
    }

    /// Where the conversion of `source` lands
    pub fn target_path(&self, source: &Path) -> PathBuf {
        self.transcoder.target_path(source)
    }

    /// Current job for `source`, if any
    pub fn job(&self, source: &Path) -> Option<ConversionJob> {
        self.jobs.lock().get(source).cloned()
    }

    /// All jobs in the index
    pub fn jobs(&self) -> Vec<ConversionJob> {
        self.jobs.lock().values().cloned().collect()
    }

    /// Estimated progress for `source`, 0 if unknown
    pub async fn progress(&self, source: &Path) -> u8 {
        match self.job(source) {
            Some(job) => job_progress(&job).await,
            None => 0,
        }
    }

    /// State and progress of the job for `source`, `None` when there is none
    pub async fn status(&self, source: &Path) -> Option<ConversionStatus> {
        let job = self.job(source)?;
        Some(ConversionStatus {
            state: job.state,
            progress: job_progress(&job).await,
            target_path: job.target_path,
        })
    }

    fn check_not_queued(&self, source: &Path) -> ConversionResult<()> {
        match self.jobs.lock().get(source) {
            Some(job) => Err(duplicate_error(job)),
            None => Ok(()),
        }
    }
}

fn duplicate_error(job: &ConversionJob) -> ConversionError {
    match job.state {
        ConversionState::Converting => ConversionError::AlreadyConverting(job.source_path.clone()),
        _ => ConversionError::AlreadyQueued(job.source_path.clone()),
    }
}

async fn job_progress(job: &ConversionJob) -> u8 {
    if job.state != ConversionState::Converting {
        return 0;
    }
    match tokio::fs::metadata(&job.target_path).await {
        Ok(meta) => estimate_progress(job.source_size_bytes, meta.len()),
        Err(_) => 0,
    }
}

fn set_state(jobs: &JobIndex, source: &Path, state: ConversionState) {
    if let Some(job) = jobs.lock().get_mut(source) {
        job.state = state;
        if state == ConversionState::Converting {
            job.started_at = Some(Utc::now());
        }
    }
}

async fn run_job(
    jobs: JobIndex,
    transcoder: Arc<dyn Transcoder>,
    permits: Arc<Semaphore>,
    source: PathBuf,
    target: PathBuf,
) -> ConversionResult<PathBuf> {
    let _permit = match permits.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            jobs.lock().remove(&source);
            return Err(ConversionError::Closed);
        }
    };

    set_state(&jobs, &source, ConversionState::Converting);
    tracing::info!("Converting {:?}", source);

    let result = transcoder.convert(&source, &target).await;

    match result {
        Ok(()) => {
            set_state(&jobs, &source, ConversionState::Completed);
            if let Err(e) = tokio::fs::remove_file(&source).await {
                tracing::warn!("Failed to remove converted source {:?}: {}", source, e);
            }
            let sidecar = sidecar_path(&source);
            if tokio::fs::try_exists(&sidecar).await.unwrap_or(false) {
                if let Err(e) = tokio::fs::rename(&sidecar, sidecar_path(&target)).await {
                    tracing::warn!("Failed to move metadata for {:?}: {}", source, e);
                }
            }
            jobs.lock().remove(&source);
            tracing::info!("Conversion completed: {:?}", target);
            Ok(target)
        }
        Err(e) => {
            set_state(&jobs, &source, ConversionState::Failed);
            let _ = tokio::fs::remove_file(&target).await;
            jobs.lock().remove(&source);
            tracing::error!("Conversion of {:?} failed: {}", source, e);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tempfile::tempdir;

    /// Writes half a target, waits for the gate, then finishes
    struct GatedTranscoder {
        gate: Arc<Semaphore>,
        partial: Vec<u8>,
        fail: AtomicBool,
    }

    impl GatedTranscoder {
        fn new(partial_len: usize) -> Self {
            Self {
                gate: Arc::new(Semaphore::new(0)),
                partial: vec![0u8; partial_len],
                fail: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl Transcoder for GatedTranscoder {
        async fn convert(&self, _source: &Path, target: &Path) -> ConversionResult<()> {
            tokio::fs::write(target, &self.partial).await?;
            let permit = self.gate.acquire().await.map_err(|_| ConversionError::Closed)?;
            permit.forget();
            if self.fail.load(Ordering::SeqCst) {
                return Err(ConversionError::TranscodeFailed("bad input".to_string()));
            }
            tokio::fs::write(target, b"converted").await?;
            Ok(())
        }
    }

    async fn wait_for_state(coordinator: &ConversionCoordinator, source: &Path, state: ConversionState) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if coordinator.job(source).map(|j| j.state) == Some(state) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("job never reached expected state");
    }

    #[test]
    fn test_estimate_progress() {
        assert_eq!(estimate_progress(0, 10), 0);
        assert_eq!(estimate_progress(100, 0), 0);
        assert_eq!(estimate_progress(100, 75), 50);
        assert_eq!(estimate_progress(100, 150), 99);
        assert_eq!(estimate_progress(100, 10_000), 99);
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_is_rejected() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.webm");
        let b = dir.path().join("b.webm");
        std::fs::write(&a, vec![1u8; 100]).unwrap();
        std::fs::write(&b, vec![1u8; 100]).unwrap();

        let transcoder = Arc::new(GatedTranscoder::new(75));
        let coordinator = ConversionCoordinator::new(transcoder.clone(), 1);

        let EnqueueOutcome::Queued(ticket_a) = coordinator.enqueue(&a).await.unwrap() else {
            panic!("expected a queued job");
        };
        wait_for_state(&coordinator, &a, ConversionState::Converting).await;
        assert!(matches!(
            coordinator.enqueue(&a).await,
            Err(ConversionError::AlreadyConverting(_))
        ));

        // a holds the only worker, so b waits in the queue
        let EnqueueOutcome::Queued(ticket_b) = coordinator.enqueue(&b).await.unwrap() else {
            panic!("expected a queued job");
        };
        assert_eq!(coordinator.job(&b).unwrap().state, ConversionState::Queued);
        assert!(matches!(
            coordinator.enqueue(&b).await,
            Err(ConversionError::AlreadyQueued(_))
        ));
        assert_eq!(coordinator.progress(&b).await, 0);

        // partial target is 75 bytes against an estimated 150
        tokio::time::timeout(Duration::from_secs(5), async {
            while coordinator.progress(&a).await != 50 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("progress never reached 50");
        let status = coordinator.status(&a).await.unwrap();
        assert_eq!(status.state, ConversionState::Converting);
        assert_eq!(status.progress, 50);

        transcoder.gate.add_permits(2);
        let target = ticket_a.wait().await.unwrap();
        ticket_b.wait().await.unwrap();

        assert_eq!(target, dir.path().join("a.mp4"));
        assert!(coordinator.status(&a).await.is_none());
        assert!(!a.exists());
        assert_eq!(std::fs::read(&target).unwrap(), b"converted");
    }

    #[tokio::test]
    async fn test_failed_job_keeps_source_and_can_retry() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("a.webm");
        std::fs::write(&source, vec![1u8; 10]).unwrap();

        let transcoder = Arc::new(GatedTranscoder::new(4));
        transcoder.fail.store(true, Ordering::SeqCst);
        transcoder.gate.add_permits(1);
        let coordinator = ConversionCoordinator::new(transcoder.clone(), 2);

        let EnqueueOutcome::Queued(ticket) = coordinator.enqueue(&source).await.unwrap() else {
            panic!("expected a queued job");
        };
        assert!(matches!(
            ticket.wait().await,
            Err(ConversionError::TranscodeFailed(_))
        ));
        assert!(source.exists());
        assert!(!dir.path().join("a.mp4").exists());
        assert!(coordinator.job(&source).is_none());

        transcoder.fail.store(false, Ordering::SeqCst);
        transcoder.gate.add_permits(1);
        let EnqueueOutcome::Queued(ticket) = coordinator.enqueue(&source).await.unwrap() else {
            panic!("expected a queued job");
        };
        ticket.wait().await.unwrap();
        assert!(!source.exists());
    }

    #[tokio::test]
    async fn test_existing_target_and_missing_source() {
        let dir = tempdir().unwrap();
        let coordinator = ConversionCoordinator::new(Arc::new(GatedTranscoder::new(1)), 1);

        let missing = dir.path().join("missing.webm");
        assert!(matches!(
            coordinator.enqueue(&missing).await,
            Err(ConversionError::SourceNotFound(_))
        ));

        let done = dir.path().join("done.webm");
        std::fs::write(&done, b"x").unwrap();
        std::fs::write(dir.path().join("done.mp4"), b"y").unwrap();
        assert!(matches!(
            coordinator.enqueue(&done).await.unwrap(),
            EnqueueOutcome::AlreadyConverted { .. }
        ));
    }

    #[tokio::test]
    async fn test_metadata_follows_conversion() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("a.webm");
        std::fs::write(&source, b"media").unwrap();
        std::fs::write(sidecar_path(&source), br#"{"title":"x"}"#).unwrap();

        let transcoder = Arc::new(GatedTranscoder::new(1));
        transcoder.gate.add_permits(1);
        let coordinator = ConversionCoordinator::new(transcoder, 1);

        let EnqueueOutcome::Queued(ticket) = coordinator.enqueue(&source).await.unwrap() else {
            panic!("expected a queued job");
        };
        let target = ticket.wait().await.unwrap();
        assert!(sidecar_path(&target).exists());
        assert!(!sidecar_path(&source).exists());
    }
}
