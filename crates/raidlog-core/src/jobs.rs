//! Directory-scan import: copying an external folder of raw logs into
//! `pending/`, guarded so only one such job runs at a time.

use crate::config::has_recognized_extension;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Single-flight flag for background jobs.
#[derive(Debug, Default)]
pub struct JobCoordinator {
    running: AtomicBool,
}

/// Held for the duration of a job; dropping it frees the slot. Owned so it
/// can move into a blocking task.
#[derive(Debug)]
pub struct JobGuard {
    coordinator: Arc<JobCoordinator>,
}

impl JobCoordinator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// `None` if a job is already running.
    pub fn try_start(self: &Arc<Self>) -> Option<JobGuard> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| JobGuard {
                coordinator: Arc::clone(self),
            })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// [`enqueue_directory`] under the single-flight flag. `Ok(None)` means
    /// another scan holds it and nothing was copied.
    pub fn enqueue_exclusive(
        self: &Arc<Self>,
        source: &Path,
        pending: &Path,
        extensions: &[String],
    ) -> io::Result<Option<EnqueueSummary>> {
        let Some(_guard) = self.try_start() else {
            info!(source = %source.display(), "Directory scan already running");
            return Ok(None);
        };
        enqueue_directory(source, pending, extensions).map(Some)
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.coordinator.running.store(false, Ordering::Release);
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueSummary {
    pub copied: usize,
    pub skipped_existing: usize,
    pub errors: usize,
}

/// Copy every recognized file under `source` into `pending`. Each file is
/// written under a `.partial` name first and renamed once complete, so the
/// watcher never sees a half-written log.
pub fn enqueue_directory(
    source: &Path,
    pending: &Path,
    extensions: &[String],
) -> io::Result<EnqueueSummary> {
    let mut summary = EnqueueSummary::default();
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable entry");
                summary.errors += 1;
                continue;
            }
        };
        let path = entry.path();
        if !entry.file_type().is_file() || !has_recognized_extension(path, extensions) {
            continue;
        }
        let Some(name) = path.file_name() else { continue };

        let target = pending.join(name);
        if target.exists() {
            debug!(path = %path.display(), "Already pending");
            summary.skipped_existing += 1;
            continue;
        }

        let mut partial_name = name.to_os_string();
        partial_name.push(".partial");
        let partial = pending.join(partial_name);
        match fs::copy(path, &partial).and_then(|_| fs::rename(&partial, &target)) {
            Ok(()) => summary.copied += 1,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to enqueue");
                let _ = fs::remove_file(&partial);
                summary.errors += 1;
            }
        }
    }
    info!(
        source = %source.display(),
        copied = summary.copied,
        skipped = summary.skipped_existing,
        errors = summary.errors,
        "Directory enqueue finished"
    );
    Ok(summary)
}
