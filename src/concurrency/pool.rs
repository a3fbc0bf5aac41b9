//! Bounded-concurrency migration pool
//!
//! [`MigrationPool::sync`] hands the batch to a dispatcher task and returns
//! at once. The dispatcher takes one semaphore permit per image before
//! spawning its task, so at most `parallelism` images are ever running.
//! Each task writes its ledger record and updates the batch counters before
//! its permit is dropped. A task that unwinds before counting its image is
//! still counted, so the batch always completes.

use super::batch::{BatchProgress, BatchSummary, BatchTracker, WorkBatch};
use crate::catalog::ImageCatalog;
use crate::error::{MigratorError, Result};
use crate::image::ImageRef;
use crate::ledger::{Ledger, MigrationOutcome};
use crate::logging::Logger;
use crate::registry::ImageVerifier;
use crate::transfer::{SyncManifest, TransferTool, TransferVerdict};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, oneshot};
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

/// Per-image lifecycle, used for log fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageState {
    Pending,
    Running,
    VerifyPending,
    Succeeded,
    Failed,
}

impl fmt::Display for ImageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImageState::Pending => "pending",
            ImageState::Running => "running",
            ImageState::VerifyPending => "verify-pending",
            ImageState::Succeeded => "succeeded",
            ImageState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Admission gate capacity, fixed for the batch
    pub parallelism: usize,
    pub source_registry: String,
    pub target_registry: String,
    /// Directory for the transient sync manifests
    pub manifest_dir: PathBuf,
    pub verify_timeout: Duration,
}

struct PoolInner {
    settings: PoolSettings,
    transfer: Arc<dyn TransferTool>,
    verifier: Arc<dyn ImageVerifier>,
    ledger: Arc<Ledger>,
    status_sink: Option<Arc<dyn ImageCatalog>>,
    logger: Logger,
}

#[derive(Clone)]
pub struct MigrationPool {
    inner: Arc<PoolInner>,
}

impl MigrationPool {
    /// `status_sink`, when given, also receives every outcome for the
    /// catalog's status table
    pub fn new(
        settings: PoolSettings,
        transfer: Arc<dyn TransferTool>,
        verifier: Arc<dyn ImageVerifier>,
        ledger: Arc<Ledger>,
        status_sink: Option<Arc<dyn ImageCatalog>>,
        logger: Logger,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                settings,
                transfer,
                verifier,
                ledger,
                status_sink,
                logger,
            }),
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.inner.settings
    }

    /// Start migrating `batch` in the background
    pub fn sync(&self, batch: WorkBatch) -> BatchHandle {
        let total = batch.len();
        let (tracker, done) = BatchTracker::new(total);
        let tracker = Arc::new(tracker);
        let span = tracing::info_span!("batch", id = %Uuid::new_v4(), total);

        let dispatcher = if batch.is_empty() {
            tracing::info!(parent: &span, "empty batch, nothing to migrate");
            None
        } else {
            let inner = Arc::clone(&self.inner);
            let tracker = Arc::clone(&tracker);
            Some(tokio::spawn(
                dispatch(inner, batch, tracker, span.clone()).instrument(span),
            ))
        };

        BatchHandle {
            done,
            tracker,
            dispatcher,
        }
    }
}

async fn dispatch(inner: Arc<PoolInner>, batch: WorkBatch, tracker: Arc<BatchTracker>, span: tracing::Span) {
    let parallelism = inner.settings.parallelism.max(1);
    let gate = Arc::new(Semaphore::new(parallelism));
    tracing::info!(parallelism, "dispatching batch");

    for image in batch.images {
        tracing::debug!(image = %image, state = %ImageState::Pending, "waiting for a slot");
        let permit = match Arc::clone(&gate).acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                let outcome = MigrationOutcome::failed(&image, format!("admission failed: {}", e));
                tracker.admit().await;
                let completion = Completion::new(Arc::clone(&tracker), &image, None);
                inner.finish(completion, outcome).await;
                continue;
            }
        };

        let inner = Arc::clone(&inner);
        let tracker = Arc::clone(&tracker);
        tokio::spawn(
            async move {
                inner.run_image(image, tracker, permit).await;
            }
            .instrument(span.clone()),
        );
    }
}

impl PoolInner {
    async fn run_image(self: Arc<Self>, image: ImageRef, tracker: Arc<BatchTracker>, permit: OwnedSemaphorePermit) {
        let running = tracker.admit().await;
        let completion = Completion::new(tracker, &image, Some(permit));
        tracing::info!(image = %image, state = %ImageState::Running, running, "migration started");

        // a panic inside the migration becomes a failed outcome for this image
        let worker = Arc::clone(&self);
        let migrated = image.clone();
        let outcome = match tokio::spawn(async move { worker.migrate(&migrated).await }).await {
            Ok(outcome) => outcome,
            Err(e) => MigrationOutcome::failed(&image, format!("migration task aborted: {}", e)),
        };

        self.finish(completion, outcome).await;
    }

    async fn migrate(&self, image: &ImageRef) -> MigrationOutcome {
        let settings = &self.settings;
        let manifest = match SyncManifest::write(
            &settings.manifest_dir,
            image,
            &settings.source_registry,
            &settings.target_registry,
        )
        .await
        {
            Ok(manifest) => manifest,
            Err(e) => return MigrationOutcome::failed(image, e.to_string()),
        };

        let outcome = match self.transfer.transfer(image, manifest.path()).await {
            TransferVerdict::Completed => self.verify(image).await,
            TransferVerdict::Failed(cause) => {
                MigrationOutcome::failed(image, MigratorError::Transfer(cause).to_string())
            }
        };

        // on unwind the manifest is deleted by its drop instead
        manifest.remove().await;
        outcome
    }

    async fn verify(&self, image: &ImageRef) -> MigrationOutcome {
        tracing::debug!(image = %image, state = %ImageState::VerifyPending, "transfer reported success");
        match self.verifier.verify(image, self.settings.verify_timeout).await {
            Ok(size) if size > 0 => MigrationOutcome::succeeded(image, size),
            Ok(_) => MigrationOutcome::failed(
                image,
                MigratorError::Verification(format!("{} has no data at the destination", image)).to_string(),
            ),
            Err(e) => MigrationOutcome::failed(image, e.to_string()),
        }
    }

    /// Terminal bookkeeping: ledger, optional status sink, then batch counters
    async fn finish(&self, mut completion: Completion, outcome: MigrationOutcome) {
        let image = outcome.image_ref();
        completion.settle(&outcome);
        self.ledger.append(&outcome).await;

        if let Some(sink) = &self.status_sink {
            if let Err(e) = sink.record_outcome(&outcome).await {
                tracing::warn!(image = %image, error = %e, "status sink write failed");
            }
        }

        let progress = completion.record().await;
        if outcome.is_success() {
            let size = outcome.image_size.unwrap_or_default();
            let logger = &self.logger;
            logger.success(&format!(
                "[{}/{}] {} migrated ({}), {} in {} at {}",
                progress.completed,
                progress.total,
                image,
                logger.format_size(size),
                logger.format_size(progress.transferred_bytes),
                logger.format_duration(progress.elapsed),
                logger.format_speed(progress.transferred_bytes, progress.elapsed),
            ));
        } else {
            tracing::warn!(
                image = %image,
                state = %ImageState::Failed,
                completed = progress.completed,
                total = progress.total,
                cause = outcome.errmsg.as_deref().unwrap_or_default(),
                "migration failed"
            );
        }
        let state = if outcome.is_success() {
            ImageState::Succeeded
        } else {
            ImageState::Failed
        };
        tracing::debug!(image = %image, state = %state, remaining = progress.remaining, "image finished");
    }
}

/// Counts one admitted image exactly once. Dropped before
/// [`Completion::record`], it records the settled outcome (or a failure)
/// from a fresh task and releases the slot after that.
struct Completion {
    tracker: Arc<BatchTracker>,
    image: ImageRef,
    outcome: Option<MigrationOutcome>,
    permit: Option<OwnedSemaphorePermit>,
    recorded: bool,
}

impl Completion {
    fn new(tracker: Arc<BatchTracker>, image: &ImageRef, permit: Option<OwnedSemaphorePermit>) -> Self {
        Self {
            tracker,
            image: image.clone(),
            outcome: None,
            permit,
            recorded: false,
        }
    }

    /// Outcome to count if the task unwinds before `record`
    fn settle(&mut self, outcome: &MigrationOutcome) {
        self.outcome = Some(outcome.clone());
    }

    fn take_outcome(&mut self) -> MigrationOutcome {
        self.outcome.take().unwrap_or_else(|| {
            MigrationOutcome::failed(&self.image, "migration task ended without an outcome")
        })
    }

    /// Update the batch counters, then release the slot
    async fn record(mut self) -> BatchProgress {
        let outcome = self.take_outcome();
        let progress = self.tracker.record(&outcome).await;
        self.recorded = true;
        progress
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if self.recorded {
            return;
        }
        let outcome = self.take_outcome();
        tracing::error!(image = %self.image, "image task ended early, counting it from a cleanup task");

        let tracker = Arc::clone(&self.tracker);
        let permit = self.permit.take();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tracker.record(&outcome).await;
                    drop(permit);
                });
            }
            Err(e) => tracing::error!(image = %self.image, error = %e, "no runtime to count the image"),
        }
    }
}

/// Completion handle of a running batch
pub struct BatchHandle {
    done: oneshot::Receiver<()>,
    tracker: Arc<BatchTracker>,
    dispatcher: Option<JoinHandle<()>>,
}

impl BatchHandle {
    /// Wait for every image of the batch to reach a terminal state
    pub async fn wait(self) -> Result<BatchSummary> {
        let completed = self.done.await;
        if let Some(dispatcher) = self.dispatcher {
            if let Err(e) = dispatcher.await {
                tracing::error!(error = %e, "dispatcher task failed");
            }
        }
        completed.map_err(|_| {
            MigratorError::Transfer("batch ended before every image completed".to_string())
        })?;
        Ok(self.tracker.summary().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{LedgerMode, read_outcomes};
    use async_trait::async_trait;
    use std::path::Path;

    struct AlwaysCompletes;

    #[async_trait]
    impl TransferTool for AlwaysCompletes {
        async fn transfer(&self, _image: &ImageRef, manifest: &Path) -> TransferVerdict {
            assert!(manifest.exists());
            TransferVerdict::Completed
        }
    }

    struct FixedSize(u64);

    #[async_trait]
    impl ImageVerifier for FixedSize {
        async fn verify(&self, image: &ImageRef, _deadline: Duration) -> Result<u64> {
            if image.tag == "missing" {
                return Err(MigratorError::Verification(format!("Manifest not found for {}", image)));
            }
            Ok(self.0)
        }
    }

    struct PanicsMidTransfer;

    #[async_trait]
    impl TransferTool for PanicsMidTransfer {
        async fn transfer(&self, image: &ImageRef, _manifest: &Path) -> TransferVerdict {
            panic!("tool crashed on {}", image);
        }
    }

    /// Status sink that keeps what it was given, or panics on every write
    #[derive(Default)]
    struct RecordingSink {
        recorded: std::sync::Mutex<Vec<String>>,
        panics: bool,
    }

    #[async_trait]
    impl ImageCatalog for RecordingSink {
        async fn job_image_ids(&self, _start: &str, _end: &str) -> Result<Vec<i64>> {
            Ok(Vec::new())
        }

        async fn official_image_ids(&self) -> Result<Vec<i64>> {
            Ok(Vec::new())
        }

        async fn images_by_ids(&self, _ids: &[i64]) -> Result<Vec<ImageRef>> {
            Ok(Vec::new())
        }

        async fn record_outcome(&self, outcome: &MigrationOutcome) -> Result<()> {
            if self.panics {
                panic!("status table write crashed");
            }
            self.recorded.lock().unwrap().push(outcome.image_ref().to_string());
            Ok(())
        }

        async fn publish_image_metadata(&self, _outcome: &MigrationOutcome, _az: &str) -> Result<()> {
            Ok(())
        }
    }

    async fn pool_with(
        dir: &Path,
        transfer: Arc<dyn TransferTool>,
        verified: u64,
        sink: Option<Arc<dyn ImageCatalog>>,
    ) -> (MigrationPool, Arc<Ledger>) {
        let ledger = Arc::new(Ledger::open(&dir.join("out"), LedgerMode::Migration).await.unwrap());
        let settings = PoolSettings {
            parallelism: 2,
            source_registry: "old.local".to_string(),
            target_registry: "harbor.local".to_string(),
            manifest_dir: dir.to_path_buf(),
            verify_timeout: Duration::from_secs(1),
        };
        let pool = MigrationPool::new(
            settings,
            transfer,
            Arc::new(FixedSize(verified)),
            Arc::clone(&ledger),
            sink,
            Logger::new_quiet(),
        );
        (pool, ledger)
    }

    async fn pool(dir: &Path, verified: u64) -> (MigrationPool, Arc<Ledger>) {
        pool_with(dir, Arc::new(AlwaysCompletes), verified, None).await
    }

    #[tokio::test]
    async fn test_empty_batch_completes_without_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, _) = pool(dir.path(), 10).await;
        let summary = pool.sync(WorkBatch::default()).wait().await.unwrap();
        assert_eq!(summary.total, 0);
        assert_eq!(summary.peak_running, 0);
    }

    #[tokio::test]
    async fn test_verification_failure_is_recorded_as_failed() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, ledger) = pool(dir.path(), 500).await;
        let batch = WorkBatch::new(vec![
            ImageRef::new("lib/nginx", "1.25"),
            ImageRef::new("lib/redis", "missing"),
        ]);

        let summary = pool.sync(batch).wait().await.unwrap();
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.transferred_bytes, 500);

        let failures = read_outcomes(ledger.failure_path()).await.unwrap();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].errmsg.as_deref().unwrap().contains("Manifest not found"));
    }

    #[tokio::test]
    async fn test_zero_size_is_not_verified() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, ledger) = pool(dir.path(), 0).await;
        let summary = pool
            .sync(WorkBatch::new(vec![ImageRef::new("lib/nginx", "1.25")]))
            .wait()
            .await
            .unwrap();
        assert_eq!(summary.failed, 1);
        assert!(read_outcomes(ledger.success_path()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_manifests_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, _) = pool(dir.path(), 1).await;
        pool.sync(WorkBatch::new(vec![ImageRef::new("ai/pytorch", "2.1")]))
            .wait()
            .await
            .unwrap();
        assert!(!dir.path().join("ai-pytorch:2.1.yaml").exists());
    }

    #[tokio::test]
    async fn test_crashed_transfer_fails_image_and_removes_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, ledger) = pool_with(dir.path(), Arc::new(PanicsMidTransfer), 1, None).await;
        let summary = pool
            .sync(WorkBatch::new(vec![ImageRef::new("ai/pytorch", "2.1")]))
            .wait()
            .await
            .unwrap();

        assert_eq!(summary.failed, 1);
        assert!(!dir.path().join("ai-pytorch:2.1.yaml").exists());
        let failures = read_outcomes(ledger.failure_path()).await.unwrap();
        assert!(failures[0].errmsg.as_deref().unwrap().contains("migration task aborted"));
    }

    #[tokio::test]
    async fn test_status_sink_receives_every_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let (pool, _) = pool_with(
            dir.path(),
            Arc::new(AlwaysCompletes),
            10,
            Some(Arc::clone(&sink) as Arc<dyn ImageCatalog>),
        )
        .await;

        // a clone shares the sink
        let shared = pool.clone();
        let batch = WorkBatch::new(vec![
            ImageRef::new("lib/nginx", "1.25"),
            ImageRef::new("lib/redis", "missing"),
        ]);
        shared.sync(batch).wait().await.unwrap();

        let mut recorded = sink.recorded.lock().unwrap().clone();
        recorded.sort();
        assert_eq!(recorded, vec!["lib/nginx:1.25", "lib/redis:missing"]);
    }

    #[tokio::test]
    async fn test_batch_completes_when_bookkeeping_panics() {
        let dir = tempfile::tempdir().unwrap();
        let sink = RecordingSink {
            panics: true,
            ..Default::default()
        };
        let (pool, ledger) = pool_with(
            dir.path(),
            Arc::new(AlwaysCompletes),
            10,
            Some(Arc::new(sink) as Arc<dyn ImageCatalog>),
        )
        .await;
        let batch = WorkBatch::new(vec![
            ImageRef::new("lib/nginx", "1.25"),
            ImageRef::new("lib/redis", "7"),
            ImageRef::new("ai/pytorch", "2.1"),
        ]);

        let summary = tokio::time::timeout(Duration::from_secs(10), pool.sync(batch).wait())
            .await
            .expect("batch never completed")
            .unwrap();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded + summary.failed, 3);
        // the ledger was written before the sink, so the counters agree with it
        assert_eq!(summary.succeeded, 3);
        assert_eq!(read_outcomes(ledger.success_path()).await.unwrap().len(), 3);
    }

    #[test]
    fn test_state_names() {
        assert_eq!(ImageState::VerifyPending.to_string(), "verify-pending");
    }
}
