//! The per-file stages shared by the worker pool and bulk import:
//! hash, duplicate check, parse, import, then the terminal move.

use crate::config::AppConfig;
use crate::detector::Detector;
use crate::error::{Error, Result};
use crate::hasher;
use crate::importer::{ImportOutcome, Importer};
use crate::invoker::{ParserInvoker, ParserOutput};
use crate::lifecycle::{self, OwnedFile, StorageLayout};
use crate::log_model::ParsedLog;
use crate::storage::Database;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Where a file ended up.
#[derive(Debug)]
pub enum FileOutcome {
    Done(ImportOutcome),
    Failed(String),
    /// Returned to pending because of cancellation.
    Released,
}

enum Staged {
    Duplicate(i64),
    Finished {
        outcome: ImportOutcome,
        content_hash: String,
        started_at: DateTime<Utc>,
        output: ParserOutput,
    },
}

pub struct Pipeline {
    layout: StorageLayout,
    invoker: Arc<dyn ParserInvoker>,
    importer: Importer,
    db_path: PathBuf,
}

impl Pipeline {
    pub fn new(
        layout: StorageLayout,
        invoker: Arc<dyn ParserInvoker>,
        importer: Importer,
        db_path: PathBuf,
    ) -> Self {
        Self {
            layout,
            invoker,
            importer,
            db_path,
        }
    }

    pub fn from_config(config: &AppConfig, invoker: Arc<dyn ParserInvoker>) -> Self {
        Self::new(
            StorageLayout::new(&config.storage_root),
            invoker,
            Importer::new(Detector::new(config.detector.clone())),
            config.database_path(),
        )
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Create the storage directories and the database schema. Run once
    /// before workers start opening their own connections.
    pub fn prepare(&self) -> Result<()> {
        self.layout.ensure()?;
        if let Some(parent) = self.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Database::open(&self.db_path)?;
        Ok(())
    }

    /// Run every stage for a file this process owns and move it to its
    /// terminal directory. Never returns an error: failures are routed to
    /// `failed/` with a sidecar.
    pub async fn process(self: &Arc<Self>, owned: OwnedFile, cancel: &CancellationToken) -> FileOutcome {
        let scratch = match self.layout.scratch_dir() {
            Ok(dir) => dir,
            Err(e) => return self.route_failure(owned, Error::Io(e)),
        };

        let staged = self.stage(&owned, scratch.path(), cancel).await;
        let outcome = match staged {
            Ok(staged) => self.finalize(owned, staged).await,
            Err(e) => self.route_failure(owned, e),
        };

        lifecycle::remove_scratch(scratch);
        outcome
    }

    async fn stage(
        self: &Arc<Self>,
        owned: &OwnedFile,
        scratch: &Path,
        cancel: &CancellationToken,
    ) -> Result<Staged> {
        let path = owned.path().to_path_buf();
        let content_hash = task::spawn_blocking(move || hasher::hash_file(&path))
            .await
            .map_err(|e| Error::Other(format!("hash task failed: {}", e)))??;

        let this = Arc::clone(self);
        let hash = content_hash.clone();
        let existing = task::spawn_blocking(move || -> Result<Option<i64>> {
            let db = Database::open(&this.db_path)?;
            Importer::find_duplicate(&db, &hash)
        })
        .await
        .map_err(|e| Error::Other(format!("lookup task failed: {}", e)))??;
        if let Some(encounter_id) = existing {
            info!(source = owned.source_name(), hash = %content_hash, encounter_id, "Duplicate upload");
            return Ok(Staged::Duplicate(encounter_id));
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let (path, name) = (owned.path().to_path_buf(), owned.source_name().to_string());
        let scratch_dir = scratch.to_path_buf();
        let input = task::spawn_blocking(move || lifecycle::isolate_input(&path, &name, &scratch_dir))
            .await
            .map_err(|e| Error::Other(format!("staging task failed: {}", e)))??;
        let output = self.invoker.invoke(&input, scratch, cancel).await?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        // Past this point the import runs to completion.
        let this = Arc::clone(self);
        let json = output.json.clone();
        let hash = content_hash.clone();
        let source_name = owned.source_name().to_string();
        let (outcome, started_at) = task::spawn_blocking(move || -> Result<_> {
            let log = ParsedLog::from_path(&json)?;
            let mut db = Database::open(&this.db_path)?;
            let outcome = this.importer.import(&mut db, &hash, &source_name, &log)?;
            Ok((outcome, log.started_at))
        })
        .await
        .map_err(|e| Error::Other(format!("import task failed: {}", e)))??;

        Ok(Staged::Finished {
            outcome,
            content_hash,
            started_at,
            output,
        })
    }

    async fn finalize(self: &Arc<Self>, owned: OwnedFile, staged: Staged) -> FileOutcome {
        let (outcome, content_hash, started_at, output) = match staged {
            Staged::Duplicate(encounter_id) => {
                return self.discard(owned, ImportOutcome::Duplicate { encounter_id });
            }
            Staged::Finished {
                outcome,
                content_hash,
                started_at,
                output,
            } => (outcome, content_hash, started_at, output),
        };

        let encounter_id = match &outcome {
            ImportOutcome::Imported { encounter_id, .. } => *encounter_id,
            _ => return self.discard(owned, outcome),
        };

        let dest = match self
            .layout
            .complete(&owned, &content_hash, &output.artifacts, started_at)
        {
            Ok(dest) => dest,
            Err(e) => {
                let message = format!("encounter {} imported but storing files failed: {}", encounter_id, e);
                return self.route_failure(owned, Error::Other(message));
            }
        };

        let this = Arc::clone(self);
        let storage_path = dest.to_string_lossy().into_owned();
        let recorded = task::spawn_blocking(move || -> Result<()> {
            let db = Database::open(&this.db_path)?;
            db.set_encounter_storage_path(encounter_id, &storage_path)?;
            Ok(())
        })
        .await;
        match recorded {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(encounter_id, error = %e, "Failed to record storage path"),
            Err(e) => warn!(encounter_id, error = %e, "Storage path task failed"),
        }

        FileOutcome::Done(outcome)
    }

    fn discard(&self, owned: OwnedFile, outcome: ImportOutcome) -> FileOutcome {
        if let ImportOutcome::Skipped(reason) = &outcome {
            info!(source = owned.source_name(), %reason, "Skipped log");
        }
        match self.layout.discard(&owned) {
            Ok(()) => FileOutcome::Done(outcome),
            Err(e) => self.route_failure(owned, Error::Io(e)),
        }
    }

    /// Cancellation hands the file back to pending; anything else is a failure.
    pub(crate) fn route_failure(&self, owned: OwnedFile, err: Error) -> FileOutcome {
        if matches!(err, Error::Cancelled) {
            return match self.layout.release(owned) {
                Ok(_) => FileOutcome::Released,
                Err(e) => {
                    error!(error = %e, "Failed to release cancelled file");
                    FileOutcome::Released
                }
            };
        }

        let message = err.to_string();
        let source_name = owned.source_name().to_string();
        if let Err(e) = self.layout.fail(owned, &message) {
            error!(source = %source_name, error = %e, "Failed to move file to failed directory");
        }
        FileOutcome::Failed(message)
    }
}
