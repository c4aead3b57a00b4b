//! feedindex CLI — inspect cursor state and try the indexer out.
//!
//! Usage:
//! ```bash
//! feedindex info
//! feedindex inspect ./cursors.json
//! feedindex inspect ./cursors.db --sqlite --id search
//! feedindex demo --feeds 3 --records 500 --store ./cursors.json
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use feedindex_core::IndexerConfig;

mod cmd_demo;
mod cmd_inspect;
mod logging;

use logging::{init_tracing, LogConfig};

#[derive(Parser)]
#[command(
    name = "feedindex",
    about = "Incremental, crash-safe indexing of append-only feeds",
    version
)]
struct Cli {
    /// Log level: trace | debug | info | warn | error
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Emit JSON structured logs
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show engine defaults and available storage backends
    Info,

    /// Decode and print a persisted cursor snapshot
    Inspect {
        /// Snapshot file, or SQLite database with --sqlite
        path: String,
        /// Read from a SQLite cursor store
        #[arg(long)]
        sqlite: bool,
        /// Indexer id within the SQLite store
        #[arg(long, default_value = "default")]
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Index a generated in-memory log until ready
    Demo {
        /// Number of feeds to generate
        #[arg(long, default_value_t = 3)]
        feeds: u8,
        /// Records per feed
        #[arg(long, default_value_t = 200)]
        records: u32,
        /// JSON file with an indexer config (version, max_batch_size, ...)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Persist cursors to this snapshot file; reruns resume from it
        #[arg(long)]
        store: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(&LogConfig {
        level: cli.log_level.clone(),
        json: cli.json_logs,
        ..Default::default()
    });

    match cli.command {
        Commands::Info => cmd_info(),

        Commands::Inspect { path, sqlite, id, json } => {
            cmd_inspect::run(&path, sqlite, &id, json).await
        }

        Commands::Demo { feeds, records, config, store } => {
            cmd_demo::run(cmd_demo::DemoArgs {
                feeds,
                records,
                config: config.as_deref(),
                store: store.as_deref(),
            })
            .await
        }
    }
}

fn cmd_info() -> Result<()> {
    let defaults = IndexerConfig::default();
    println!("FeedIndex v{}", env!("CARGO_PKG_VERSION"));
    println!("  Default index version: {}", defaults.version);
    println!("  Default batch size:    {} records/feed/pass", defaults.max_batch_size);
    println!("  Event channel size:    {}", defaults.event_capacity);
    println!("  Cursor stores:         memory, file, SQLite");
    println!("  Delivery:              at least once, in order per feed");
    Ok(())
}
