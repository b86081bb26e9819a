//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod crawl;
mod init;
mod jobs;
mod records;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::models::JobRunStatus;

#[derive(Parser)]
#[command(name = "listcrawl")]
#[command(about = "Crawl infinite-scroll timelines into a deduplicated record store")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database and write a starter config if none exists
    Init,

    /// List configured targets
    Targets,

    /// Crawl one or more targets
    Crawl {
        /// Target IDs to crawl (can specify multiple, or use --all)
        target_ids: Vec<String>,
        /// Crawl every configured target
        #[arg(short, long)]
        all: bool,
        /// Override the per-target record quota
        #[arg(short = 'n', long)]
        max_records: Option<usize>,
        /// Crawl without writing records or job history to the database
        #[arg(long)]
        dry_run: bool,
    },

    /// Show recent crawl jobs
    Jobs {
        /// Filter by status (running, completed, failed)
        #[arg(short, long)]
        status: Option<String>,
        /// Maximum number of jobs to show
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// Show stored records for a target, or per-target totals
    Records {
        /// Target ID (omit for totals)
        target_id: Option<String>,
        /// Maximum number of records to show
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// Mark jobs left running by a dead process as failed
    Reset,
}

/// Parse arguments and run the selected command.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match cli.config {
        Some(ref path) => Config::load_from_path(path).await?,
        None => Config::load().await?,
    };

    match cli.command {
        Commands::Init => init::cmd_init(&config).await,
        Commands::Targets => init::cmd_targets(&config),
        Commands::Crawl {
            target_ids,
            all,
            max_records,
            dry_run,
        } => {
            let target_ids = if all {
                config.targets.keys().cloned().collect()
            } else {
                target_ids
            };
            crawl::cmd_crawl(&config, &target_ids, max_records, dry_run).await
        }
        Commands::Jobs { status, limit } => {
            let status = match status {
                Some(s) => Some(
                    JobRunStatus::from_str(&s)
                        .ok_or_else(|| anyhow::anyhow!("Unknown job status: {}", s))?,
                ),
                None => None,
            };
            jobs::cmd_jobs(&config, status, limit).await
        }
        Commands::Records { target_id, limit } => {
            records::cmd_records(&config, target_id.as_deref(), limit).await
        }
        Commands::Reset => jobs::cmd_reset(&config).await,
    }
}
