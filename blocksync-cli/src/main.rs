//! Block crawler CLI.
//!
//! Synchronizes an Ethereum-style chain into a local Parquet store and
//! repairs gaps in already-crawled ranges.
//!
//! # Usage
//!
//! ```bash
//! # Follow the chain tip forever, 15 confirmations behind
//! blocksync blocks synchronize --confirmations 15
//!
//! # Crawl an explicit range once (endpoints in either order)
//! blocksync blocks add --blocks 105-340
//!
//! # Find and repair holes left by earlier runs
//! blocksync blocks missing --blocks 0-2000000 --jobs 8
//!
//! # List crawled blocks inside a time window
//! blocksync blocks list --start 2026-08-29T00:00:00Z --include-start
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use alloy::providers::ProviderBuilder;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use blocksync::backfill::{Backfill, BackfillConfig};
use blocksync::client::{ChainClient, RpcChainClient};
use blocksync::dispatch::Dispatcher;
use blocksync::store::{BlockStore, ParquetStore};
use blocksync::stream::StreamBoundary;
use blocksync::sync::{SyncConfig, Syncer};
use blocksync::telemetry::TelemetryClient;
use blocksync::types::{BlockRange, ProcessingOrder};

mod config;

use config::Config;

/// Ethereum block synchronizer and gap repairer.
#[derive(Debug, Parser)]
#[command(name = "blocksync", version, about)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

/// Top-level command groups.
#[derive(Debug, Subcommand)]
enum Command {
    /// Block crawling commands.
    Blocks {
        #[command(subcommand)]
        command: BlocksCommand,
    },
}

/// Block crawling subcommands.
#[derive(Debug, Subcommand)]
enum BlocksCommand {
    /// Follow the chain tip, crawling new blocks as they confirm.
    Synchronize {
        /// Block to start synchronization from.
        #[arg(short, long, default_value_t = 0)]
        start: u64,

        /// Confirmations required before a block is stored.
        #[arg(short, long, default_value_t = 0)]
        confirmations: u64,

        /// Order in which to process blocks (asc or desc).
        #[arg(long, default_value = "desc", value_parser = parse_order)]
        order: ProcessingOrder,

        /// Number of crawl workers; 1 runs fully in-process.
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Skip crawling block transactions.
        #[arg(short = 'n', long)]
        notransactions: bool,
    },

    /// Crawl an explicit block range once.
    Add {
        /// Block range in `{low}-{high}` format, endpoints in either
        /// order.
        #[arg(short, long, value_parser = parse_range)]
        blocks: BlockRange,

        /// Number of crawl workers.
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Skip crawling block transactions.
        #[arg(short = 'n', long)]
        notransactions: bool,
    },

    /// Detect and repair missing blocks in a range.
    Missing {
        /// Block range in `{low}-{high}` format, endpoints in either
        /// order.
        #[arg(short, long, value_parser = parse_range)]
        blocks: BlockRange,

        /// Repair one block at a time with verbose logging.
        #[arg(short, long)]
        lazy: bool,

        /// Log every repaired block.
        #[arg(short, long)]
        verbose: bool,

        /// Number of repair workers (ignored with --lazy).
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Skip crawling block transactions.
        #[arg(short = 'n', long)]
        notransactions: bool,
    },

    /// List crawled blocks whose timestamps fall in a time window.
    List {
        /// Window start, RFC 3339 (default: one hour ago).
        #[arg(short, long)]
        start: Option<DateTime<Utc>>,

        /// Include events exactly at the window start.
        #[arg(long)]
        include_start: bool,

        /// Window end, RFC 3339 (default: now).
        #[arg(short, long)]
        end: Option<DateTime<Utc>>,

        /// Include events exactly at the window end.
        #[arg(long)]
        include_end: bool,
    },
}

fn parse_range(s: &str) -> Result<BlockRange, String> {
    s.parse().map_err(|e: blocksync::Error| e.to_string())
}

fn parse_order(s: &str) -> Result<ProcessingOrder, String> {
    s.parse().map_err(|e: blocksync::Error| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    let store = Arc::new(
        ParquetStore::open(&config.data_dir)
            .with_context(|| format!("opening store in {}", config.data_dir.display()))?,
    );
    let provider = ProviderBuilder::new().connect_http(
        config
            .rpc_url
            .parse()
            .with_context(|| format!("invalid RPC URL: {}", config.rpc_url))?,
    );
    let client = Arc::new(RpcChainClient::new(provider));

    let Command::Blocks { command } = cli.command;
    match command {
        BlocksCommand::Synchronize {
            start,
            confirmations,
            order,
            jobs,
            notransactions,
        } => {
            let sync_config = SyncConfig {
                start_block: start,
                confirmations,
                order,
                chunk_size: config.chunk_size,
                poll_interval: Duration::from_secs(config.poll_interval_secs),
            };
            cmd_synchronize(
                client,
                store,
                sync_config,
                jobs.unwrap_or(config.workers),
                !notransactions,
            )
            .await
        }
        BlocksCommand::Add {
            blocks,
            jobs,
            notransactions,
        } => {
            cmd_add(
                client,
                store,
                blocks,
                config.chunk_size,
                jobs.unwrap_or(config.workers),
                !notransactions,
            )
            .await
        }
        BlocksCommand::Missing {
            blocks,
            lazy,
            verbose,
            jobs,
            notransactions,
        } => {
            let backfill_config = BackfillConfig {
                range: blocks,
                lazy,
                verbose,
                with_transactions: !notransactions,
                workers: jobs.unwrap_or(config.workers),
                chunk_size: config.chunk_size,
            };
            cmd_missing(client, store, backfill_config).await
        }
        BlocksCommand::List {
            start,
            include_start,
            end,
            include_end,
        } => {
            cmd_list(
                store,
                &config,
                start,
                end,
                include_start,
                include_end,
            )
            .await
        }
    }
}

/// Run the sync loop until interrupted; Ctrl-C finishes the current
/// chunk and exits cleanly.
async fn cmd_synchronize<C: ChainClient + 'static>(
    client: Arc<C>,
    store: Arc<ParquetStore>,
    sync_config: SyncConfig,
    workers: usize,
    with_transactions: bool,
) -> Result<()> {
    let dispatcher = Dispatcher::new(
        Arc::clone(&client),
        Arc::clone(&store),
        workers,
        with_transactions,
    );
    let syncer = Syncer::new(client, Arc::clone(&store), dispatcher, sync_config);

    let (tx, rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, finishing the current chunk");
            let _ = tx.send(true);
        }
    });

    syncer.run(rx).await?;
    store.flush().await?;
    Ok(())
}

/// Crawl one explicit range and report how long it took.
async fn cmd_add<C: ChainClient + 'static>(
    client: Arc<C>,
    store: Arc<ParquetStore>,
    range: BlockRange,
    chunk_size: u64,
    workers: usize,
    with_transactions: bool,
) -> Result<()> {
    let started = std::time::Instant::now();
    let dispatcher = Dispatcher::new(client, store, workers, with_transactions);
    let report = dispatcher
        .dispatch_range(range, ProcessingOrder::Descending, chunk_size, None)
        .await?;
    tracing::info!(
        range = %range,
        stored = report.stored,
        skipped = report.skipped,
        workers,
        elapsed_secs = started.elapsed().as_secs_f64(),
        "range crawl complete"
    );
    Ok(())
}

/// Scan a range for gaps and repair them.
async fn cmd_missing<C: ChainClient + 'static>(
    client: Arc<C>,
    store: Arc<ParquetStore>,
    backfill_config: BackfillConfig,
) -> Result<()> {
    let report = Backfill::new(client, store, backfill_config).run().await?;
    tracing::info!(
        missing = report.missing,
        stored = report.stored,
        still_missing = report.skipped,
        workers = report.workers,
        elapsed_secs = report.elapsed.as_secs_f64(),
        "backfill complete"
    );
    Ok(())
}

/// Windowed block listing, optionally published to telemetry.
#[allow(clippy::print_stdout)]
async fn cmd_list(
    store: Arc<ParquetStore>,
    config: &Config,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    include_start: bool,
    include_end: bool,
) -> Result<()> {
    let now = Utc::now();
    let window = StreamBoundary::new(
        start.unwrap_or(now - chrono::Duration::hours(1)),
        end.unwrap_or(now),
        include_start,
        include_end,
    )?;

    let (blocks, boundary) = store.blocks_in_window(&window).await?;
    let output = serde_json::json!({
        "blocks": blocks,
        "boundary": boundary,
    });

    if let Some(telemetry) = &config.telemetry {
        let title = format!("Block listing: {window}");
        let tags = vec![format!("crawler_version:{}", env!("CARGO_PKG_VERSION"))];
        TelemetryClient::new(&telemetry.url, &telemetry.token)
            .publish("block_window", &title, &output, &tags)
            .await;
    }

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
