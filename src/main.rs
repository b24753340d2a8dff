//! # docsync CLI
//!
//! Incrementally syncs an office document library into a searchable unit
//! index.
//!
//! ## Usage
//!
//! ```bash
//! docsync --config ./config/docsync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docsync init` | Create the state and index databases |
//! | `docsync sync <connector>` | Discover, transfer and process changed documents |
//! | `docsync stats` | Print item counts and processing statistics |
//! | `docsync items` | List tracked items |
//! | `docsync log <identity>` | Show the processing log of one item |
//! | `docsync reset-failed` | Move failed items back to pending |
//! | `docsync search "<query>"` | Semantic search over indexed units |
//!
//! ## Examples
//!
//! ```bash
//! docsync init
//! docsync sync filesystem
//! docsync sync remote --full --progress json
//! docsync items --status failed
//! docsync search "quarterly revenue" --top-k 5
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use docsync::ingest::{self, CancellationFlag};
use docsync::models::ItemStatus;
use docsync::progress::ProgressMode;
use docsync::{config, logging, migrate, search, stats};

/// docsync: incremental document sync and batch processing.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docsync.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "docsync",
    about = "Incremental sync and batch processing of office document libraries",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docsync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the state and index schemas.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Sync one connector.
    ///
    /// Discovers every item, queues new, changed and previously failed ones,
    /// then transfers and processes them in batches.
    Sync {
        /// Connector to run: `filesystem` or `remote`.
        connector: String,

        /// Reprocess every discovered item regardless of recorded state.
        #[arg(long)]
        full: bool,

        /// Progress output on stderr: auto, off, human or json.
        #[arg(long, default_value = "auto", value_parser = parse_progress)]
        progress: ProgressMode,
    },

    /// Print state statistics.
    Stats,

    /// Move every failed item back to pending.
    ResetFailed,

    /// List tracked items.
    Items {
        /// Only items with this status (pending, processing, success, failed).
        #[arg(long)]
        status: Option<ItemStatus>,
    },

    /// Show the processing log of one item.
    Log {
        /// Item identity as shown by `docsync items`.
        identity: String,

        /// Number of most recent entries to show.
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },

    /// Semantic search over indexed units.
    Search {
        query: String,

        #[arg(long, default_value_t = 10)]
        top_k: usize,

        /// Minimum cosine similarity.
        #[arg(long)]
        threshold: Option<f32>,
    },
}

fn parse_progress(value: &str) -> Result<ProgressMode, String> {
    ProgressMode::parse(value)
        .ok_or_else(|| format!("invalid progress mode '{}': use auto, off, human or json", value))
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init_tracing(&cfg.logging);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sync {
            connector,
            full,
            progress,
        } => {
            let cancel = CancellationFlag::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("interrupt received, finishing the current item...");
                    on_signal.cancel();
                }
            });

            let summary = ingest::run_sync(&cfg, &connector, full, progress, cancel).await?;
            ingest::print_summary(&connector, &summary);
            if !summary.is_success() {
                return Ok(ExitCode::from(1));
            }
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::ResetFailed => {
            stats::run_reset_failed(&cfg).await?;
        }
        Commands::Items { status } => {
            stats::run_items(&cfg, status).await?;
        }
        Commands::Log { identity, limit } => {
            stats::run_log(&cfg, &identity, limit).await?;
        }
        Commands::Search {
            query,
            top_k,
            threshold,
        } => {
            search::run_search(&cfg, &query, top_k, threshold).await?;
        }
    }

    Ok(ExitCode::SUCCESS)
}
