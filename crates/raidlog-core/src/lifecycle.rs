//! Directory-backed file state machine.
//!
//! A file's state is the directory that holds it. Every transition is a
//! rename, and the worker whose rename into `processing/` succeeds owns the
//! file until it renames it out again. [`OwnedFile`] carries that ownership;
//! `release` and `fail` consume it, `complete` and `discard` borrow it so the
//! caller can still route the file to `failed/` if the move itself errors.

use chrono::{DateTime, Datelike, Utc};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl FileState {
    /// `Processing -> Pending` is only taken on cancellation or orphan recovery.
    pub fn can_transition_to(self, next: FileState) -> bool {
        use FileState::*;
        matches!(
            (self, next),
            (Pending, Processing) | (Processing, Completed) | (Processing, Failed) | (Processing, Pending)
        )
    }

}

/// A file this process has renamed into `processing/`.
#[derive(Debug)]
pub struct OwnedFile {
    path: PathBuf,
    source_name: String,
    /// Copied in by bulk import rather than claimed from `pending/`.
    staged: bool,
}

impl OwnedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The name the file arrived under, kept for the encounter record.
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct StorageLayout {
    pending: PathBuf,
    processing: PathBuf,
    failed: PathBuf,
    completed: PathBuf,
    work: PathBuf,
}

impl StorageLayout {
    pub fn new(root: &Path) -> Self {
        Self {
            pending: root.join("pending"),
            processing: root.join("processing"),
            failed: root.join("failed"),
            completed: root.join("completed"),
            work: root.join("work"),
        }
    }

    pub fn ensure(&self) -> io::Result<()> {
        for dir in [
            &self.pending,
            &self.processing,
            &self.failed,
            &self.completed,
            &self.work,
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn dir_for(&self, state: FileState) -> &Path {
        match state {
            FileState::Pending => &self.pending,
            FileState::Processing => &self.processing,
            FileState::Completed => &self.completed,
            FileState::Failed => &self.failed,
        }
    }

    pub fn pending_dir(&self) -> &Path {
        &self.pending
    }

    /// Take ownership of a pending file. `Ok(None)` means another worker got
    /// there first (or the file vanished), which is not an error.
    pub fn claim(&self, pending_path: &Path) -> io::Result<Option<OwnedFile>> {
        let Some(name) = pending_path.file_name() else {
            return Ok(None);
        };
        let target = self.processing.join(name);
        if target.exists() {
            debug!(path = %pending_path.display(), "Same name already processing, leaving in pending");
            return Ok(None);
        }
        match fs::rename(pending_path, &target) {
            Ok(()) => {
                debug!(path = %target.display(), "Claimed");
                Ok(Some(OwnedFile {
                    source_name: name.to_string_lossy().into_owned(),
                    path: target,
                    staged: false,
                }))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Copy an arbitrary file straight into `processing/` under a unique
    /// name. Used by bulk import, which bypasses `pending/`.
    pub fn stage_copy(&self, source: &Path) -> io::Result<OwnedFile> {
        let source_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
        let staged = tempfile::Builder::new()
            .prefix("bulk-")
            .suffix(&format!("_{}", source_name))
            .tempfile_in(&self.processing)?;
        let (_, path) = staged.keep()?;
        fs::copy(source, &path)?;
        Ok(OwnedFile {
            path,
            source_name,
            staged: true,
        })
    }

    /// Hand the file back without recording a failure. Claimed files return
    /// to `pending/`; staged copies are dropped since the original is untouched.
    pub fn release(&self, owned: OwnedFile) -> io::Result<Option<PathBuf>> {
        if owned.staged {
            fs::remove_file(&owned.path)?;
            return Ok(None);
        }
        let target = self.pending.join(&owned.source_name);
        transition(FileState::Processing, FileState::Pending, &owned.path, &target)?;
        info!(path = %target.display(), "Released back to pending");
        Ok(Some(target))
    }

    /// Move the file into `failed/` with a timestamp prefix and write an
    /// `.error.txt` sidecar next to it.
    pub fn fail(&self, owned: OwnedFile, error: &str) -> io::Result<PathBuf> {
        let now = Utc::now();
        let base = format!("{}_{}", now.format("%Y%m%d-%H%M%S"), owned.source_name);
        let target = unique_path(&self.failed, &base);
        transition(FileState::Processing, FileState::Failed, &owned.path, &target)?;

        let mut sidecar_name = target.file_name().unwrap_or_default().to_os_string();
        sidecar_name.push(".error.txt");
        let mut sidecar = fs::File::create(self.failed.join(sidecar_name))?;
        writeln!(sidecar, "error: {}", error)?;
        writeln!(sidecar, "source: {}", owned.source_name)?;
        writeln!(sidecar, "failed_at: {}", now.to_rfc3339())?;

        warn!(path = %target.display(), error, "Moved to failed");
        Ok(target)
    }

    /// Permanent home for an imported encounter: `completed/YYYY/MM/<hash>/`
    /// with the source file and every report artifact.
    pub fn complete(
        &self,
        owned: &OwnedFile,
        content_hash: &str,
        artifacts: &[PathBuf],
        started_at: DateTime<Utc>,
    ) -> io::Result<PathBuf> {
        let dest = self
            .completed
            .join(format!("{:04}", started_at.year()))
            .join(format!("{:02}", started_at.month()))
            .join(content_hash);
        fs::create_dir_all(&dest)?;

        for artifact in artifacts {
            if let Some(name) = artifact.file_name() {
                move_file(artifact, &dest.join(name))?;
            }
        }
        transition(
            FileState::Processing,
            FileState::Completed,
            &owned.path,
            &dest.join(&owned.source_name),
        )?;

        info!(path = %dest.display(), "Stored encounter");
        Ok(dest)
    }

    /// Drop a file whose content is already stored or is not worth keeping.
    pub fn discard(&self, owned: &OwnedFile) -> io::Result<()> {
        fs::remove_file(&owned.path)?;
        debug!(path = %owned.path.display(), "Discarded");
        Ok(())
    }

    /// Move anything left in `processing/` by a previous run back to
    /// `pending/`. Stray tool outputs from an interrupted parse are removed.
    pub fn recover_orphans(&self, extensions: &[String]) -> io::Result<Vec<PathBuf>> {
        let mut recovered = Vec::new();
        for entry in fs::read_dir(&self.processing)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            if crate::config::has_recognized_extension(&path, extensions) {
                let Some(name) = path.file_name() else { continue };
                let target = self.pending.join(name);
                transition(FileState::Processing, FileState::Pending, &path, &target)?;
                warn!(path = %target.display(), "Recovered orphaned file");
                recovered.push(target);
            } else if let Err(e) = fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "Failed to remove stale output");
            }
        }
        Ok(recovered)
    }

    /// Re-acquire a file still sitting in `processing/` after the task that
    /// owned it died.
    pub fn adopt(&self, file_name: &str) -> Option<OwnedFile> {
        let path = self.processing.join(file_name);
        path.is_file().then(|| OwnedFile {
            path,
            source_name: file_name.to_string(),
            staged: false,
        })
    }

    /// Scratch directory for one parser run, removed on drop.
    pub fn scratch_dir(&self) -> io::Result<TempDir> {
        tempfile::Builder::new()
            .prefix("parse-")
            .tempdir_in(&self.work)
    }
}

/// Give the parser its own view of an owned file: a hard link (or a copy on
/// filesystems without links) named after the source, alone in
/// `scratch/input/`. The tool writes its outputs next to its input, so no
/// other run's files can show up during discovery.
pub fn isolate_input(path: &Path, source_name: &str, scratch: &Path) -> io::Result<PathBuf> {
    let dir = scratch.join("input");
    fs::create_dir_all(&dir)?;
    let target = dir.join(source_name);
    if fs::hard_link(path, &target).is_err() {
        fs::copy(path, &target)?;
    }
    Ok(target)
}

/// Cleanup never fails the caller.
pub fn remove_scratch(dir: TempDir) {
    let path = dir.path().to_path_buf();
    if let Err(e) = dir.close() {
        warn!(path = %path.display(), error = %e, "Failed to remove scratch directory");
    }
}

/// Move an owned file between state directories, refusing edges the state
/// machine does not have.
fn transition(from: FileState, to: FileState, src: &Path, dst: &Path) -> io::Result<()> {
    if !from.can_transition_to(to) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("illegal transition {:?} -> {:?} for {}", from, to, src.display()),
        ));
    }
    move_file(src, dst)
}

fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(e),
        Err(_) => {
            // Different filesystems.
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}

/// `dir/name`, or `dir/stem-N.ext...` with the first free `N`. The counter
/// goes before the first dot so multi-part extensions stay intact.
fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, rest) = match name.find('.') {
        Some(idx) => name.split_at(idx),
        None => (name, ""),
    };
    let mut n = 1;
    loop {
        let candidate = dir.join(format!("{}-{}{}", stem, n, rest));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}
