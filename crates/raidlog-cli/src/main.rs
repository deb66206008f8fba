mod commands;
mod logging;
mod progress;

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands, RosterAction};
use dotenv::dotenv;
use progress::CliReporter;
use raidlog_core::storage::Database;
use raidlog_core::jobs::{EnqueueSummary, JobCoordinator};
use raidlog_core::{
    bulk_import, collect_inputs, AppConfig, EliteInsightsInvoker, IngestService, Pipeline,
    ServiceControl, StorageLayout,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let _guard = logging::init_logger();

    let args = Cli::parse();

    let config = match raidlog_core::load_configuration(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let result = match args.command {
        Some(Commands::Run { scan_dirs }) => run_service(config, scan_dirs).await,
        Some(Commands::Import { paths, concurrency }) => {
            run_import(&config, &paths, concurrency).await
        }
        Some(Commands::Enqueue { dir }) => run_enqueue(&config, &dir),
        Some(Commands::Roster { action }) => run_roster(&config, action),
        Some(Commands::Outbox { limit }) => run_outbox(&config, limit),
        Some(Commands::PrintConfig) => {
            println!("Configuration: {:#?}", config);
            Ok(())
        }
        None => {
            let _ = Cli::command().print_long_help();
            Ok(())
        }
    };

    if let Err(err) = result {
        error!("Error: {:#}", err);
        process::exit(1);
    }
    Ok(())
}

/// Cancel `token` on the first Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight files");
            token.cancel();
        }
    });
}

/// Copy every scan directory into the queue. A scan still running from an
/// earlier request makes this one a no-op.
async fn scan_into(control: ServiceControl, dirs: Arc<Vec<PathBuf>>) {
    control.request_rescan();
    for dir in dirs.iter() {
        match control.enqueue_directory(dir.clone()).await {
            Ok(Some(summary)) => report_enqueue(dir, &summary),
            Ok(None) => warn!("Scan of {} skipped, another scan is running", dir.display()),
            Err(e) => error!("Scan of {} failed: {}", dir.display(), e),
        }
    }
}

/// Rescan pending and the scan directories on every SIGHUP.
#[cfg(unix)]
fn rescan_on_hangup(control: ServiceControl, dirs: Arc<Vec<PathBuf>>, cancel: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!("SIGHUP rescans unavailable: {}", e);
            return;
        }
    };
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = hangup.recv() => {
                    if received.is_none() {
                        break;
                    }
                    info!("SIGHUP received, rescanning");
                    tokio::spawn(scan_into(control.clone(), Arc::clone(&dirs)));
                }
            }
        }
    });
}

#[cfg(not(unix))]
fn rescan_on_hangup(_control: ServiceControl, _dirs: Arc<Vec<PathBuf>>, _cancel: CancellationToken) {}

async fn run_service(config: AppConfig, scan_dirs: Vec<PathBuf>) -> anyhow::Result<()> {
    for dir in &scan_dirs {
        if !dir.is_dir() {
            bail!("{} is not a directory", dir.display());
        }
    }
    let invoker = Arc::new(EliteInsightsInvoker::new(config.parser.clone()));
    let cancel = CancellationToken::new();
    let storage_root = config.storage_root.clone();

    let handle = IngestService::start(config, invoker, cancel.clone())
        .await
        .context("starting ingest service")?;
    info!(
        "Watching {} for new logs, press Ctrl-C to stop",
        storage_root.join("pending").display()
    );

    let scan_dirs = Arc::new(scan_dirs);
    if !scan_dirs.is_empty() {
        tokio::spawn(scan_into(handle.control(), Arc::clone(&scan_dirs)));
    }
    rescan_on_hangup(handle.control(), scan_dirs, cancel.clone());

    cancel_on_ctrl_c(cancel.clone());
    cancel.cancelled().await;

    let stats = handle.shutdown().await;
    info!(
        "{} imported, {} duplicates, {} skipped, {} failed, {} returned to pending",
        format!("{}", stats.imported).green(),
        format!("{}", stats.duplicates).cyan(),
        format!("{}", stats.skipped).cyan(),
        format!("{}", stats.failed).red(),
        format!("{}", stats.released).yellow(),
    );
    Ok(())
}

async fn run_import(
    config: &AppConfig,
    paths: &[PathBuf],
    concurrency: Option<usize>,
) -> anyhow::Result<()> {
    let files = collect_inputs(paths, &config.extensions);
    if files.is_empty() {
        bail!("no recognized log files found in the given paths");
    }

    let invoker = Arc::new(EliteInsightsInvoker::new(config.parser.clone()));
    let pipeline = Arc::new(Pipeline::from_config(config, invoker));
    pipeline
        .prepare()
        .context("preparing storage directories and database")?;

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let summary = bulk_import(
        pipeline,
        files,
        concurrency.unwrap_or(config.workers),
        Arc::new(CliReporter::new()),
        cancel,
    )
    .await;

    println!();
    info!(
        "{} imported, {} duplicates, {} skipped, {} failed, {} notifications queued",
        format!("{}", summary.imported).green(),
        format!("{}", summary.duplicates).cyan(),
        format!("{}", summary.skipped).cyan(),
        format!("{}", summary.failed.len()).red(),
        format!("{}", summary.notifications).yellow(),
    );
    for (path, message) in &summary.failed {
        warn!("{}: {}", path.display().to_string().red(), message);
    }
    if summary.cancelled > 0 {
        warn!("{} files were not imported due to cancellation", summary.cancelled);
    }
    Ok(())
}

fn run_enqueue(config: &AppConfig, dir: &Path) -> anyhow::Result<()> {
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }
    let layout = StorageLayout::new(&config.storage_root);
    layout.ensure().context("creating storage directories")?;

    let summary = JobCoordinator::new()
        .enqueue_exclusive(dir, layout.pending_dir(), &config.extensions)
        .with_context(|| format!("enqueueing {}", dir.display()))?;
    match summary {
        Some(summary) => report_enqueue(dir, &summary),
        None => warn!("A directory scan is already running"),
    }
    Ok(())
}

fn report_enqueue(dir: &Path, summary: &EnqueueSummary) {
    info!(
        "{}: {} queued, {} already pending, {} errors",
        dir.display(),
        format!("{}", summary.copied).green(),
        format!("{}", summary.skipped_existing).cyan(),
        format!("{}", summary.errors).red(),
    );
}

fn open_database(config: &AppConfig) -> anyhow::Result<Database> {
    let path = config.database_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    Database::open(&path).with_context(|| format!("opening database {}", path.display()))
}

fn run_roster(config: &AppConfig, action: RosterAction) -> anyhow::Result<()> {
    let db = open_database(config)?;
    match action {
        RosterAction::Add { account } => {
            if db.add_roster_member(&account)? {
                println!("{} added to roster", account.green());
            } else {
                println!("{} is already on the roster", account.yellow());
            }
        }
        RosterAction::Remove { account } => {
            if db.remove_roster_member(&account)? {
                println!("{} removed from roster", account.green());
            } else {
                println!("{} is not on the roster", account.yellow());
            }
        }
        RosterAction::List => {
            let members = db.list_roster()?;
            if members.is_empty() {
                println!("Roster is empty");
            }
            for member in members {
                println!("{}  (added {})", member.account.cyan(), member.added_at);
            }
        }
    }
    Ok(())
}

fn run_outbox(config: &AppConfig, limit: i64) -> anyhow::Result<()> {
    let db = open_database(config)?;
    let pending = db.unprocessed_notifications(limit)?;
    if pending.is_empty() {
        println!("No undelivered notifications");
        return Ok(());
    }
    for record in pending {
        println!(
            "{} {} {} {}",
            format!("#{}", record.id).cyan(),
            record.kind.yellow(),
            record.created_at,
            record.payload
        );
    }
    Ok(())
}
