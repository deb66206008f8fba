//! Import of an explicit file list, outside the folder queue.
//!
//! Each file is copied straight into `processing/` and run through the same
//! pipeline as the worker pool. Parallelism is bounded by the caller; every
//! unit opens its own database connection.

use crate::config::has_recognized_extension;
use crate::importer::ImportOutcome;
use crate::pipeline::{FileOutcome, Pipeline};
use crate::progress::ProgressReporter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Default, Clone)]
pub struct BulkSummary {
    pub imported: usize,
    pub duplicates: usize,
    pub skipped: usize,
    pub failed: Vec<(PathBuf, String)>,
    pub cancelled: usize,
    pub notifications: usize,
    pub duration: Duration,
}

impl BulkSummary {
    fn record(&mut self, path: PathBuf, outcome: FileOutcome) {
        match outcome {
            FileOutcome::Done(ImportOutcome::Imported { notifications, .. }) => {
                self.imported += 1;
                self.notifications += notifications.len();
            }
            FileOutcome::Done(ImportOutcome::Duplicate { .. }) => self.duplicates += 1,
            FileOutcome::Done(ImportOutcome::Skipped(_)) => self.skipped += 1,
            FileOutcome::Failed(message) => self.failed.push((path, message)),
            FileOutcome::Released => self.cancelled += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.imported + self.duplicates + self.skipped + self.failed.len() + self.cancelled
    }
}

/// Expand files and directories into the recognized raw logs they contain.
pub fn collect_inputs(paths: &[PathBuf], extensions: &[String]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for root in paths {
        if root.is_file() {
            if has_recognized_extension(root, extensions) {
                files.push(root.clone());
            } else {
                warn!(path = %root.display(), "Not a recognized log file");
            }
            continue;
        }
        for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
            if entry.file_type().is_file() && has_recognized_extension(entry.path(), extensions) {
                files.push(entry.into_path());
            }
        }
    }
    files.sort();
    files.dedup();
    files
}

pub async fn bulk_import(
    pipeline: Arc<Pipeline>,
    files: Vec<PathBuf>,
    concurrency: usize,
    reporter: Arc<dyn ProgressReporter>,
    cancel: CancellationToken,
) -> BulkSummary {
    let start = Instant::now();
    let total = files.len();
    let limit = Arc::new(Semaphore::new(concurrency.max(1)));
    let done = Arc::new(AtomicUsize::new(0));
    reporter.on_import_start(total);
    info!(files = total, concurrency, "Bulk import starting");

    let mut summary = BulkSummary::default();
    let mut units = JoinSet::new();
    for path in files {
        let pipeline = Arc::clone(&pipeline);
        let limit = Arc::clone(&limit);
        let reporter = Arc::clone(&reporter);
        let done = Arc::clone(&done);
        let cancel = cancel.clone();
        units.spawn(async move {
            let outcome = match limit.acquire_owned().await {
                Ok(_permit) => import_one(&pipeline, &path, &cancel).await,
                Err(_) => FileOutcome::Released,
            };
            let n = done.fetch_add(1, Ordering::Relaxed) + 1;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            reporter.on_file_complete(n, total, &name);
            (path, outcome)
        });
    }

    while let Some(joined) = units.join_next().await {
        match joined {
            Ok((path, outcome)) => summary.record(path, outcome),
            Err(e) => {
                error!(error = %e, "Bulk import unit panicked");
                summary
                    .failed
                    .push((PathBuf::new(), format!("unit panicked: {}", e)));
            }
        }
    }

    summary.duration = start.elapsed();
    reporter.on_import_complete(summary.total(), summary.duration.as_secs_f64());
    info!(
        imported = summary.imported,
        duplicates = summary.duplicates,
        skipped = summary.skipped,
        failed = summary.failed.len(),
        "Bulk import finished"
    );
    summary
}

async fn import_one(pipeline: &Arc<Pipeline>, path: &Path, cancel: &CancellationToken) -> FileOutcome {
    if cancel.is_cancelled() {
        return FileOutcome::Released;
    }
    let owned = match pipeline.layout().stage_copy(path) {
        Ok(owned) => owned,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to stage file");
            return FileOutcome::Failed(format!("staging failed: {}", e));
        }
    };
    pipeline.process(owned, cancel).await
}
