//! One-shot gap repair for an explicit block range.
//!
//! Scans the whole range through the gap detector first, then repairs
//! the aggregate missing set in a single pass, serially when `lazy`
//! (low load, per-block logging), otherwise through the parallel
//! dispatcher. Re-running is always safe: "still missing after this
//! pass" is a reportable outcome, not a failure.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::client::ChainClient;
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::gaps::find_missing;
use crate::store::BlockStore;
use crate::types::{BlockRange, DEFAULT_CHUNK_SIZE, ProcessingOrder};

/// Parameters of one backfill pass.
#[derive(Debug, Clone, Copy)]
pub struct BackfillConfig {
    /// Range to scan and repair.
    pub range: BlockRange,
    /// Repair serially with per-block logging instead of the pool.
    pub lazy: bool,
    /// Per-block logging even in pooled mode.
    pub verbose: bool,
    /// Crawl transaction lists along with the blocks.
    pub with_transactions: bool,
    /// Worker pool size for the repair dispatch (ignored when lazy).
    pub workers: usize,
    /// Blocks per gap-detector batch.
    pub chunk_size: u64,
}

impl BackfillConfig {
    /// Defaults for repairing `range`: pooled, quiet, transactions on.
    #[must_use]
    pub const fn new(range: BlockRange, workers: usize) -> Self {
        Self {
            range,
            lazy: false,
            verbose: false,
            with_transactions: true,
            workers,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Terminal summary of a backfill pass. Observability only; a pass
/// with skipped blocks is still a successful pass.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BackfillReport {
    /// Blocks found absent during the scan.
    pub missing: u64,
    /// Blocks repaired this pass.
    pub stored: u64,
    /// Blocks still missing after this pass.
    pub skipped: u64,
    /// Worker count used for the repair.
    pub workers: usize,
    /// Wall-clock duration of scan plus repair.
    pub elapsed: Duration,
}

/// The backfill controller.
#[derive(Debug)]
pub struct Backfill<C, S> {
    client: Arc<C>,
    store: Arc<S>,
    config: BackfillConfig,
}

impl<C, S> Backfill<C, S>
where
    C: ChainClient + 'static,
    S: BlockStore + 'static,
{
    /// Assemble a backfill pass from its collaborators.
    pub const fn new(client: Arc<C>, store: Arc<S>, config: BackfillConfig) -> Self {
        Self {
            client,
            store,
            config,
        }
    }

    /// Scan the range, repair the gaps, report.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails; exhausted fetch retries
    /// only show up as `skipped` in the report.
    pub async fn run(&self) -> Result<BackfillReport> {
        let started = Instant::now();
        let config = self.config;

        let mut missing = Vec::new();
        for chunk in config
            .range
            .chunks(ProcessingOrder::Descending, config.chunk_size)
        {
            let (Some(&first), Some(&last)) = (chunk.first(), chunk.last()) else {
                continue;
            };
            tracing::info!(first, last, "checking for missing blocks");
            let absent = find_missing(self.store.as_ref(), &chunk).await?;
            if !absent.is_empty() {
                tracing::info!(count = absent.len(), "found missing blocks");
            }
            missing.extend(absent);
        }
        tracing::info!(total = missing.len(), range = %config.range, "gap scan complete");

        let workers = if config.lazy { 1 } else { config.workers.max(1) };
        let dispatched = if missing.is_empty() {
            crate::dispatch::DispatchReport::default()
        } else {
            if config.lazy {
                tracing::info!("repairing lazily, one block at a time");
            }
            let dispatcher = Dispatcher::new(
                Arc::clone(&self.client),
                Arc::clone(&self.store),
                workers,
                config.with_transactions,
            )
            .verbose(config.lazy || config.verbose);
            let report = dispatcher.dispatch(&missing).await?;
            self.store.flush().await?;
            report
        };

        Ok(BackfillReport {
            missing: missing.len() as u64,
            stored: dispatched.stored,
            skipped: dispatched.skipped,
            workers,
            elapsed: started.elapsed(),
        })
    }
}
