//! Running the external log parser.
//!
//! The tool takes a config file and an input path and writes its JSON (and
//! optionally an HTML report) next to the input, named `<input stem>_*.ext`.
//! Discovery only looks at names carrying this input's exact prefix. That
//! alone cannot tell `boss_2_*.json` (input `boss_2`) from output of `boss`,
//! so callers run the tool on an input that sits alone in its directory.

use crate::config::ParserConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const MAX_STDERR_CHARS: usize = 2000;

/// Files produced for one input, already moved into the caller's directory.
#[derive(Debug, Clone)]
pub struct ParserOutput {
    pub json: PathBuf,
    /// Every produced file, the JSON included.
    pub artifacts: Vec<PathBuf>,
}

#[async_trait]
pub trait ParserInvoker: Send + Sync {
    async fn invoke(
        &self,
        input: &Path,
        output_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<ParserOutput>;
}

pub struct EliteInsightsInvoker {
    settings: ParserConfig,
}

enum Exit {
    Status(io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

impl EliteInsightsInvoker {
    pub fn new(settings: ParserConfig) -> Self {
        Self { settings }
    }

    fn command(&self, input: &Path) -> Command {
        let mut cmd = Command::new(&self.settings.executable);
        cmd.args(&self.settings.args)
            .arg("-c")
            .arg(&self.settings.config_file)
            .arg(input)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl ParserInvoker for EliteInsightsInvoker {
    async fn invoke(
        &self,
        input: &Path,
        output_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<ParserOutput> {
        let timeout = Duration::from_secs(self.settings.timeout_secs);
        debug!(path = %input.display(), "Starting parser");

        let mut child = self.command(input).spawn()?;
        let stdout = tokio::spawn(drain(child.stdout.take()));
        let stderr = tokio::spawn(drain(child.stderr.take()));

        let exit = tokio::select! {
            status = child.wait() => Exit::Status(status),
            _ = tokio::time::sleep(timeout) => Exit::TimedOut,
            _ = cancel.cancelled() => Exit::Cancelled,
        };

        let status = match exit {
            Exit::Status(status) => status?,
            Exit::TimedOut => {
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill timed out parser");
                }
                stdout.abort();
                stderr.abort();
                return Err(Error::ToolTimeout {
                    secs: self.settings.timeout_secs,
                });
            }
            Exit::Cancelled => {
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill cancelled parser");
                }
                stdout.abort();
                stderr.abort();
                return Err(Error::Cancelled);
            }
        };

        let stdout = stdout.await.unwrap_or_default();
        let stderr = stderr.await.unwrap_or_default();
        if !stdout.trim().is_empty() {
            debug!(path = %input.display(), "Parser stdout: {}", stdout.trim());
        }
        if !stderr.trim().is_empty() {
            debug!(path = %input.display(), "Parser stderr: {}", stderr.trim());
        }

        if !status.success() {
            return Err(Error::ToolFailed {
                code: status.code(),
                stderr: truncate(stderr.trim(), MAX_STDERR_CHARS),
            });
        }

        collect_outputs(input, output_dir)
    }
}

async fn drain<R: AsyncRead + Unpin>(reader: Option<R>) -> String {
    let Some(mut reader) = reader else {
        return String::new();
    };
    let mut buf = Vec::new();
    if let Err(e) = reader.read_to_end(&mut buf).await {
        debug!(error = %e, "Parser output stream closed early");
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Report files the parser wrote next to `input`: names starting with
/// `<stem>_` and ending in `.json` or `.html`, sorted.
pub fn discover_outputs(input: &Path) -> io::Result<Vec<PathBuf>> {
    let dir = input.parent().unwrap_or_else(|| Path::new("."));
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let prefix = format!("{}_", stem);

    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        let lower = name.to_ascii_lowercase();
        if name.starts_with(&prefix)
            && (lower.ends_with(".json") || lower.ends_with(".html"))
            && path.is_file()
        {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

/// Move discovered outputs into `output_dir`. A run without JSON is a failure
/// even if the tool exited cleanly; any HTML it left behind is moved anyway so
/// it does not leak into the next run's discovery.
pub fn collect_outputs(input: &Path, output_dir: &Path) -> Result<ParserOutput> {
    let mut artifacts = Vec::new();
    for produced in discover_outputs(input)? {
        let Some(name) = produced.file_name() else {
            continue;
        };
        let target = output_dir.join(name);
        fs::rename(&produced, &target).or_else(|_| {
            fs::copy(&produced, &target)?;
            fs::remove_file(&produced)
        })?;
        artifacts.push(target);
    }

    let json = artifacts
        .iter()
        .find(|p| {
            p.extension()
                .map(|e| e.eq_ignore_ascii_case("json"))
                .unwrap_or(false)
        })
        .cloned()
        .ok_or(Error::MissingOutput)?;

    debug!(json = %json.display(), artifacts = artifacts.len(), "Collected parser output");
    Ok(ParserOutput { json, artifacts })
}
