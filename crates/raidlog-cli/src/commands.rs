use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "raidlog")]
#[command(about = "Combat log ingestion and record detection", long_about = None)]
pub struct Cli {
    /// Path to a TOML configuration file (defaults to ./Config.toml if present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Watch the pending directory and process logs until Ctrl-C
    Run {
        /// Directory copied into the queue at startup and again on SIGHUP (repeatable)
        #[arg(long = "scan-dir")]
        scan_dirs: Vec<PathBuf>,
    },
    /// Import explicit log files or directories
    Import {
        /// Files or directories to import
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Number of files processed in parallel (defaults to the worker count)
        #[arg(long, short)]
        concurrency: Option<usize>,
    },
    /// Copy every recognized log under a directory into the pending queue
    Enqueue {
        /// Directory to scan
        dir: PathBuf,
    },
    /// Manage accounts eligible for DPS leaderboards
    Roster {
        #[command(subcommand)]
        action: RosterAction,
    },
    /// List notifications not yet delivered
    Outbox {
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// Print configuration values
    PrintConfig,
}

#[derive(Debug, Subcommand)]
pub enum RosterAction {
    /// Add an account (e.g. Name.1234)
    Add { account: String },
    /// Remove an account
    Remove { account: String },
    /// List all accounts
    List,
}
