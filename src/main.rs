//! # Relay CLI (`relay`)
//!
//! The `relay` binary initializes the message database, runs ingestion
//! passes against a provider dump, and inspects the result.
//!
//! ## Usage
//!
//! ```bash
//! relay --config ./config/relay.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `relay init` | Create the SQLite database and run schema migrations |
//! | `relay ingest [--channel sms\|mms\|rcs]` | Ingest new rows from the configured dump |
//! | `relay list [--limit N]` | Print stored messages, newest first |
//! | `relay stats` | Per-channel counts and watermarks |
//! | `relay capability status` | Show the persisted secondary-provider state |
//! | `relay capability reset` | Forget it so the next run probes again |

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use relay_ingest::capability::CapabilityCache;
use relay_ingest::config;
use relay_ingest::ingest::{ChannelReport, Ingestor, RunOutcome};
use relay_ingest::list;
use relay_ingest::logging;
use relay_ingest::migrate;
use relay_ingest::models::Channel;
use relay_ingest::source::dump::DumpSource;
use relay_ingest::sqlite_store::SqliteStore;
use relay_ingest::stats;

/// Relay: incremental SMS, MMS and RCS ingestion into a local message store.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/relay.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "relay",
    about = "Relay: incremental SMS, MMS and RCS ingestion",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/relay.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Run one ingestion pass against the configured source dump.
    ///
    /// Only rows above each channel's watermark are read. Messages already
    /// stored are recognized by their content identity and skipped.
    Ingest {
        /// Restrict the pass to one channel (sms, mms or rcs).
        #[arg(long)]
        channel: Option<Channel>,
    },

    /// Print stored messages, newest first.
    List {
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Show per-channel message counts and watermarks.
    Stats,

    /// Inspect or reset the cached secondary-provider capability.
    Capability {
        #[command(subcommand)]
        action: CapabilityAction,
    },
}

#[derive(Subcommand)]
enum CapabilityAction {
    /// Print the persisted state: unchecked, available or unavailable.
    Status,
    /// Clear the persisted state so the next run probes again.
    Reset,
}

fn print_channel(report: &ChannelReport) {
    let watermark = report
        .watermark_after
        .map(|w| w.to_string())
        .unwrap_or_else(|| "-".to_string());
    println!("ingest {}", report.channel);
    println!("  scanned: {}", report.rows_scanned);
    println!("  extracted: {}", report.records_extracted);
    println!("  batches: {}", report.batches_committed);
    println!("  inserted messages: {}", report.messages_inserted);
    println!("  inserted parts: {}", report.parts_inserted);
    println!("  inserted addresses: {}", report.addresses_inserted);
    println!("  watermark: {}", watermark);
    match &report.error {
        Some(e) => println!("  error: {}", e),
        None => println!("  ok"),
    }
}

async fn run_ingest(cfg: &config::Config, channel: Option<Channel>) -> Result<()> {
    let Some(dump) = cfg.source.dump.as_deref() else {
        bail!("No source configured. Set [source] dump in the config file.");
    };
    let source = Arc::new(DumpSource::load(dump)?);
    let store = Arc::new(SqliteStore::open(cfg).await?);
    let ingestor = Ingestor::from_config(cfg, source, store);

    match ingestor.run_ingestion(channel).await {
        RunOutcome::Skipped => println!("ingestion already running; skipped"),
        RunOutcome::Completed(report) => {
            for channel in &report.channels {
                print_channel(channel);
            }
            if report.has_errors() {
                bail!("ingestion finished with errors");
            }
        }
    }
    Ok(())
}

async fn run_capability(cfg: &config::Config, action: CapabilityAction) -> Result<()> {
    let store = Arc::new(SqliteStore::open(cfg).await?);
    let cache = CapabilityCache::secondary(store);
    match action {
        CapabilityAction::Status => {
            let status = cache.status().await?;
            println!("{}: {}", cache.name(), status.as_str());
        }
        CapabilityAction::Reset => {
            cache.reset().await?;
            println!("{}: reset", cache.name());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init_logging(&cfg.logging)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { channel } => {
            run_ingest(&cfg, channel).await?;
        }
        Commands::List { limit } => {
            list::run_list(&cfg, limit).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Capability { action } => {
            run_capability(&cfg, action).await?;
        }
    }

    Ok(())
}
