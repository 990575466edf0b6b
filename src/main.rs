//! Command-line interface for arangodb-river
//!
//! # Usage Examples
//!
//! ## Run
//! ```bash
//! # Tail the configured collection until Ctrl-C
//! arangodb-river run --config river.toml
//!
//! # Replay from the beginning of the log
//! arangodb-river run --config river.toml --full-sync
//!
//! # Start after an explicit tick
//! arangodb-river run --config river.toml --from-tick orders:123456
//! ```
//!
//! ## Checkpoints
//! ```bash
//! arangodb-river checkpoint show --config river.toml
//! arangodb-river checkpoint set --config river.toml orders:123456
//! ```
//!
//! ## Checkpoint Format
//! - `collection:tick`, e.g. `orders:123456`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use arangodb_river::{open_checkpoint_store, River, RiverConfig};
use arangodb_wal_source::ArangoWalSource;
use checkpoint::{Checkpoint, CheckpointStore, TickCheckpoint};
use clap::{Args, Parser, Subcommand};
use elasticsearch_sink::ElasticsearchSink;

#[derive(Parser)]
#[command(name = "arangodb-river")]
#[command(about = "Replicate an ArangoDB collection into Elasticsearch through the write-ahead log")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the river until interrupted or until it stops on a fatal error
    Run {
        #[command(flatten)]
        config: ConfigArgs,

        /// Ignore the checkpoint and replay from the start of the log
        #[arg(long)]
        full_sync: bool,

        /// Start after this position instead of the stored checkpoint
        /// (format: collection:tick)
        #[arg(long, value_name = "COLLECTION:TICK")]
        from_tick: Option<String>,
    },

    /// Inspect or override the stored checkpoint
    Checkpoint {
        #[command(subcommand)]
        command: CheckpointCommand,
    },
}

#[derive(Subcommand)]
enum CheckpointCommand {
    /// Print the checkpoint of the configured collection
    Show {
        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Overwrite the checkpoint of the configured collection
    Set {
        #[command(flatten)]
        config: ConfigArgs,

        /// New checkpoint (format: collection:tick)
        #[arg(value_name = "COLLECTION:TICK")]
        checkpoint: String,
    },
}

#[derive(Args)]
struct ConfigArgs {
    /// River configuration file
    #[arg(long, short, default_value = "river.toml", env = "ARANGODB_RIVER_CONFIG")]
    config: PathBuf,

    /// ArangoDB password (overrides source.credentials.password)
    #[arg(long, env = "ARANGODB_RIVER_SOURCE_PASSWORD", hide_env_values = true)]
    source_password: Option<String>,

    /// Elasticsearch URL (overrides target.url)
    #[arg(long, env = "ARANGODB_RIVER_TARGET_URL")]
    target_url: Option<String>,

    /// Elasticsearch password (overrides target.password)
    #[arg(long, env = "ARANGODB_RIVER_TARGET_PASSWORD", hide_env_values = true)]
    target_password: Option<String>,
}

impl ConfigArgs {
    fn load(&self) -> anyhow::Result<RiverConfig> {
        let mut config = RiverConfig::load(&self.config)?;
        if let Some(password) = &self.source_password {
            config.source.password = Some(password.clone());
        }
        if let Some(url) = &self.target_url {
            config.target.url = url.clone();
        }
        if let Some(password) = &self.target_password {
            config.target.password = Some(password.clone());
        }
        config.validate()?;
        Ok(config)
    }
}

/// Parse a `collection:tick` argument for the configured collection.
fn parse_checkpoint_arg(config: &RiverConfig, arg: &str) -> anyhow::Result<TickCheckpoint> {
    let checkpoint = TickCheckpoint::from_cli_string(arg)?;
    if checkpoint.collection != config.source.collection {
        anyhow::bail!(
            "Checkpoint is for collection '{}' but the river follows '{}'",
            checkpoint.collection,
            config.source.collection
        );
    }
    Ok(checkpoint)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            full_sync,
            from_tick,
        } => {
            let mut config = config.load()?;
            if full_sync {
                config.source.full_sync = true;
            }
            let start = from_tick
                .as_deref()
                .map(|arg| parse_checkpoint_arg(&config, arg))
                .transpose()?;
            run_river(config, start).await
        }
        Commands::Checkpoint { command } => match command {
            CheckpointCommand::Show { config } => {
                let config = config.load()?;
                let sink = Arc::new(ElasticsearchSink::new(config.elasticsearch_opts())?);
                let store = open_checkpoint_store(&config, sink).await?;
                match store.read_checkpoint(&config.source.collection).await? {
                    Some(cp) => println!("{} (updated {})", cp.to_cli_string(), cp.updated_at),
                    None => println!("No checkpoint for '{}'", config.source.collection),
                }
                Ok(())
            }
            CheckpointCommand::Set { config, checkpoint } => {
                let config = config.load()?;
                let checkpoint = parse_checkpoint_arg(&config, &checkpoint)?;
                let sink = Arc::new(ElasticsearchSink::new(config.elasticsearch_opts())?);
                let store = open_checkpoint_store(&config, sink).await?;
                store.store_checkpoint(&checkpoint).await?;
                tracing::info!("Checkpoint set to {}", checkpoint.to_cli_string());
                Ok(())
            }
        },
    }
}

async fn run_river(config: RiverConfig, start: Option<TickCheckpoint>) -> anyhow::Result<()> {
    let sink = Arc::new(ElasticsearchSink::new(config.elasticsearch_opts())?);
    let source = Arc::new(ArangoWalSource::new(config.arango_opts())?);
    let store = open_checkpoint_store(&config, sink.clone()).await?;

    let mut river = River::new(config, source, sink, store);
    if let Some(start) = start {
        river = river.with_start_tick(start.last_tick);
    }
    river.start().await.context("River failed to start")?;

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            tracing::info!("Received interrupt signal (Ctrl+C)");
        }
        _ = river.stopped() => {
            tracing::warn!("River stopped on its own");
        }
    }

    river.close().await.context("River stopped with an error")?;
    Ok(())
}
