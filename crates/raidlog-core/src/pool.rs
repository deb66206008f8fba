use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::importer::ImportOutcome;
use crate::invoker::ParserInvoker;
use crate::jobs::{EnqueueSummary, JobCoordinator};
use crate::pipeline::{FileOutcome, Pipeline};
use crate::queue::{self, Intake};
use notify::RecommendedWatcher;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Running totals across all workers.
#[derive(Debug, Default)]
pub struct PoolStats {
    imported: AtomicUsize,
    duplicates: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
    released: AtomicUsize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub imported: usize,
    pub duplicates: usize,
    pub skipped: usize,
    pub failed: usize,
    pub released: usize,
}

impl StatsSnapshot {
    /// Files that reached a terminal directory.
    pub fn finished(&self) -> usize {
        self.imported + self.duplicates + self.skipped + self.failed
    }
}

impl PoolStats {
    pub fn record(&self, outcome: &FileOutcome) {
        let counter = match outcome {
            FileOutcome::Done(ImportOutcome::Imported { .. }) => &self.imported,
            FileOutcome::Done(ImportOutcome::Duplicate { .. }) => &self.duplicates,
            FileOutcome::Done(ImportOutcome::Skipped(_)) => &self.skipped,
            FileOutcome::Failed(_) => &self.failed,
            FileOutcome::Released => &self.released,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            imported: self.imported.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
        }
    }
}

/// The long-running ingestion service: watcher, rescan and N workers.
pub struct IngestService;

pub struct ServiceHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    stats: Arc<PoolStats>,
    control: ServiceControl,
    _watcher: RecommendedWatcher,
}

/// Cloneable side channel into a running service, for signal handlers and
/// other tasks that outlive a borrow of the handle.
#[derive(Clone)]
pub struct ServiceControl {
    rescan: Arc<Notify>,
    jobs: Arc<JobCoordinator>,
    pending: PathBuf,
    extensions: Vec<String>,
}

impl ServiceControl {
    /// Wake the rescan task now instead of at its next tick.
    pub fn request_rescan(&self) {
        self.rescan.notify_one();
    }

    /// Directory-scan import into the running service. Returns `None` when
    /// another scan is still in progress.
    pub async fn enqueue_directory(&self, source: PathBuf) -> Result<Option<EnqueueSummary>> {
        let jobs = Arc::clone(&self.jobs);
        let pending = self.pending.clone();
        let extensions = self.extensions.clone();
        let summary = tokio::task::spawn_blocking(move || {
            jobs.enqueue_exclusive(&source, &pending, &extensions)
        })
        .await
        .map_err(|e| Error::Other(format!("enqueue task failed: {}", e)))??;
        if summary.is_some() {
            self.request_rescan();
        }
        Ok(summary)
    }
}

impl IngestService {
    /// Prepare the directories, return orphans to pending, then start
    /// feeding and draining the queue until `cancel` fires.
    pub async fn start(
        config: AppConfig,
        invoker: Arc<dyn ParserInvoker>,
        cancel: CancellationToken,
    ) -> Result<ServiceHandle> {
        let pipeline = Arc::new(Pipeline::from_config(&config, invoker));
        let prepared = Arc::clone(&pipeline);
        tokio::task::spawn_blocking(move || prepared.prepare())
            .await
            .map_err(|e| Error::Other(format!("startup task failed: {}", e)))??;
        let layout = pipeline.layout().clone();

        let recovered = layout.recover_orphans(&config.extensions)?;
        if !recovered.is_empty() {
            info!(count = recovered.len(), "Recovered files left in processing");
        }

        let intake = Arc::new(Intake::new(config.extensions.clone()));
        let pending = layout.pending_dir().to_path_buf();
        let watcher = queue::watch_pending(&pending, Arc::clone(&intake))?;
        let queued = intake.scan(&pending)?;
        info!(queued, workers = config.workers, "Ingest service starting");

        let stats = Arc::new(PoolStats::default());
        let rescan = Arc::new(Notify::new());
        let pending_dir = pending.clone();
        let mut tasks = Vec::with_capacity(config.workers + 1);
        tasks.push(queue::spawn_rescan(
            Arc::clone(&intake),
            pending,
            config.rescan_interval(),
            config.claim_reset_interval(),
            Arc::clone(&rescan),
            cancel.clone(),
        ));

        for worker in 0..config.workers {
            tasks.push(tokio::spawn(worker_loop(
                worker,
                Arc::clone(&intake),
                Arc::clone(&pipeline),
                Arc::clone(&stats),
                config.settle_delay(),
                cancel.clone(),
            )));
        }

        Ok(ServiceHandle {
            cancel,
            tasks,
            stats,
            control: ServiceControl {
                rescan,
                jobs: JobCoordinator::new(),
                pending: pending_dir,
                extensions: config.extensions,
            },
            _watcher: watcher,
        })
    }
}

impl ServiceHandle {
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn control(&self) -> ServiceControl {
        self.control.clone()
    }

    pub fn request_rescan(&self) {
        self.control.request_rescan();
    }

    pub async fn enqueue_directory(&self, source: PathBuf) -> Result<Option<EnqueueSummary>> {
        self.control.enqueue_directory(source).await
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Poll until `target` files have finished or `timeout` elapses.
    pub async fn wait_for(&self, target: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.stats().finished() < target {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        true
    }

    /// Cancel and wait for every worker to drain its current file.
    pub async fn shutdown(self) -> StatsSnapshot {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Service task ended abnormally");
            }
        }
        let snapshot = self.stats.snapshot();
        info!(?snapshot, "Ingest service stopped");
        snapshot
    }
}

async fn worker_loop(
    worker: usize,
    intake: Arc<Intake>,
    pipeline: Arc<Pipeline>,
    stats: Arc<PoolStats>,
    settle_delay: Duration,
    cancel: CancellationToken,
) {
    debug!(worker, "Worker started");
    loop {
        let path = tokio::select! {
            _ = cancel.cancelled() => break,
            next = intake.next() => match next {
                Some(path) => path,
                None => break,
            },
        };

        queue::settle(&path, settle_delay, &cancel).await;
        if cancel.is_cancelled() {
            intake.finish(&path);
            break;
        }

        if let Some(outcome) = run_one(worker, &pipeline, path.clone(), &cancel).await {
            stats.record(&outcome);
        }
        intake.finish(&path);
    }
    debug!(worker, "Worker stopped");
}

/// Claim and process one path in its own task so a panic is contained to
/// that file.
async fn run_one(
    worker: usize,
    pipeline: &Arc<Pipeline>,
    path: PathBuf,
    cancel: &CancellationToken,
) -> Option<FileOutcome> {
    let owned = match pipeline.layout().claim(&path) {
        Ok(Some(owned)) => owned,
        Ok(None) => return None,
        Err(e) => {
            error!(worker, path = %path.display(), error = %e, "Failed to claim file");
            return None;
        }
    };
    let file_name = owned.file_name();
    info!(worker, path = %path.display(), "Processing");

    let task_pipeline = Arc::clone(pipeline);
    let task_cancel = cancel.clone();
    let handle =
        tokio::spawn(async move { task_pipeline.process(owned, &task_cancel).await });

    match handle.await {
        Ok(outcome) => {
            log_outcome(worker, &path, &outcome);
            Some(outcome)
        }
        Err(e) => {
            error!(worker, path = %path.display(), error = %e, "Processing task panicked");
            let message = format!("processing panicked: {}", e);
            let outcome = match pipeline.layout().adopt(&file_name) {
                Some(owned) => pipeline.route_failure(owned, Error::Other(message)),
                None => FileOutcome::Failed(message),
            };
            Some(outcome)
        }
    }
}

fn log_outcome(worker: usize, path: &Path, outcome: &FileOutcome) {
    match outcome {
        FileOutcome::Done(ImportOutcome::Imported {
            encounter_id,
            notifications,
        }) => info!(
            worker,
            path = %path.display(),
            encounter_id,
            notifications = notifications.len(),
            "Completed"
        ),
        FileOutcome::Done(ImportOutcome::Duplicate { encounter_id }) => {
            info!(worker, path = %path.display(), encounter_id, "Completed (duplicate)")
        }
        FileOutcome::Done(ImportOutcome::Skipped(reason)) => {
            info!(worker, path = %path.display(), %reason, "Completed (skipped)")
        }
        FileOutcome::Failed(message) => {
            error!(worker, path = %path.display(), error = %message, "Failed")
        }
        FileOutcome::Released => info!(worker, path = %path.display(), "Released on shutdown"),
    }
}
