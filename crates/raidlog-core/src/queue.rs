//! Feeding the worker pool.
//!
//! Two producers push pending paths into one unbounded queue: a filesystem
//! watcher on `pending/` and a periodic full scan that covers events the
//! watcher missed. A shared claim set drops paths that are already queued or
//! in flight; it is cleared on its own interval so it cannot grow unbounded.

use crate::config::has_recognized_extension;
use crate::error::Result;
use dashmap::DashSet;
use notify::event::ModifyKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Unbounded multi-consumer queue of paths.
pub struct WorkQueue {
    tx: mpsc::UnboundedSender<PathBuf>,
    rx: Mutex<mpsc::UnboundedReceiver<PathBuf>>,
}

impl WorkQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    pub fn push(&self, path: PathBuf) -> bool {
        self.tx.send(path).is_ok()
    }

    /// Wait for the next path. Workers take turns holding the receiver.
    pub async fn pop(&self) -> Option<PathBuf> {
        self.rx.lock().await.recv().await
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
pub struct ClaimSet {
    claimed: DashSet<PathBuf>,
}

impl ClaimSet {
    /// True if the path was not already claimed.
    pub fn try_claim(&self, path: &Path) -> bool {
        self.claimed.insert(path.to_path_buf())
    }

    pub fn release(&self, path: &Path) {
        self.claimed.remove(path);
    }

    pub fn clear(&self) {
        self.claimed.clear();
    }

    pub fn len(&self) -> usize {
        self.claimed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claimed.is_empty()
    }
}

/// Entry point for both producers.
pub struct Intake {
    queue: WorkQueue,
    claims: ClaimSet,
    extensions: Vec<String>,
}

impl Intake {
    pub fn new(extensions: Vec<String>) -> Self {
        Self {
            queue: WorkQueue::new(),
            claims: ClaimSet::default(),
            extensions,
        }
    }

    /// Queue a path if it is a recognized raw log not already claimed.
    pub fn offer(&self, path: PathBuf) -> bool {
        if !has_recognized_extension(&path, &self.extensions) || !path.is_file() {
            return false;
        }
        if !self.claims.try_claim(&path) {
            return false;
        }
        debug!(path = %path.display(), "Queued");
        self.queue.push(path)
    }

    pub async fn next(&self) -> Option<PathBuf> {
        self.queue.pop().await
    }

    /// Called by a worker once it is done with a path.
    pub fn finish(&self, path: &Path) {
        self.claims.release(path);
    }

    pub fn claims(&self) -> &ClaimSet {
        &self.claims
    }

    /// Offer every entry currently in `dir`. Returns how many were queued.
    pub fn scan(&self, dir: &Path) -> io::Result<usize> {
        let mut queued = 0;
        for entry in fs::read_dir(dir)? {
            if self.offer(entry?.path()) {
                queued += 1;
            }
        }
        Ok(queued)
    }
}

/// Watch `dir` and offer every created or renamed-in file. The returned
/// watcher must be kept alive.
pub fn watch_pending(dir: &Path, intake: Arc<Intake>) -> Result<RecommendedWatcher> {
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(_))
                ) {
                    for path in event.paths {
                        intake.offer(path);
                    }
                }
            }
            Err(e) => warn!(error = %e, "Watcher error"),
        },
        Config::default(),
    )?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    info!(path = %dir.display(), "Watching pending directory");
    Ok(watcher)
}

/// Periodic full scan of `dir`, also run on demand through `trigger`, plus
/// the claim-set reset.
pub fn spawn_rescan(
    intake: Arc<Intake>,
    dir: PathBuf,
    interval: Duration,
    claim_reset: Duration,
    trigger: Arc<Notify>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut scan_tick = tokio::time::interval(interval);
        let mut reset_tick = tokio::time::interval(claim_reset);
        // Both intervals fire immediately; the startup scan is done by the caller.
        scan_tick.tick().await;
        reset_tick.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = scan_tick.tick() => rescan(&intake, &dir),
                _ = trigger.notified() => rescan(&intake, &dir),
                _ = reset_tick.tick() => {
                    debug!(claims = intake.claims().len(), "Clearing claim set");
                    intake.claims().clear();
                }
            }
        }
        debug!("Rescan task stopped");
    })
}

fn rescan(intake: &Intake, dir: &Path) {
    match intake.scan(dir) {
        Ok(0) => {}
        Ok(n) => info!(queued = n, "Rescan picked up files"),
        Err(e) => warn!(path = %dir.display(), error = %e, "Rescan failed"),
    }
}

/// Wait until `path` has not been modified for `delay`, so a writer that is
/// still flushing is not raced. Returns early on cancellation.
pub async fn settle(path: &Path, delay: Duration, cancel: &CancellationToken) {
    if delay.is_zero() {
        return;
    }
    let age = fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .unwrap_or(Duration::ZERO);
    if age >= delay {
        return;
    }
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(delay - age) => {}
    }
}
