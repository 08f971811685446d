//! Bounded-parallelism crawl of block batches.
//!
//! The dispatcher is the engine's only concurrency boundary. A batch
//! is partitioned across at most `workers` independent tasks; each
//! task fetches and persists its blocks on its own and the dispatcher
//! joins them all before returning, so in-flight work never exceeds
//! one chunk. With a single worker everything runs in-process with no
//! pool at all, which doubles as the verbose diagnostic mode.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::client::ChainClient;
use crate::error::Result;
use crate::retry::{RetryPolicy, with_retry};
use crate::store::BlockStore;
use crate::types::{BlockRange, ProcessingOrder};

/// Outcome counters for one dispatch pass.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct DispatchReport {
    /// Blocks fetched and upserted.
    pub stored: u64,
    /// Blocks given up on after the retry budget was spent.
    pub skipped: u64,
}

impl DispatchReport {
    fn merge(&mut self, other: Self) {
        self.stored += other.stored;
        self.skipped += other.skipped;
    }
}

/// Fetch-and-persist executor over a bounded worker pool.
#[derive(Debug)]
pub struct Dispatcher<C, S> {
    client: Arc<C>,
    store: Arc<S>,
    workers: usize,
    with_transactions: bool,
    retry: RetryPolicy,
    verbose: bool,
}

impl<C, S> Dispatcher<C, S>
where
    C: ChainClient + 'static,
    S: BlockStore + 'static,
{
    /// Build a dispatcher; `workers` is clamped to at least 1.
    pub fn new(client: Arc<C>, store: Arc<S>, workers: usize, with_transactions: bool) -> Self {
        Self {
            client,
            store,
            workers: workers.max(1),
            with_transactions,
            retry: RetryPolicy::default(),
            verbose: false,
        }
    }

    /// Log every stored block at info level (serial diagnostics).
    #[must_use]
    pub const fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Override the per-fetch retry policy.
    #[must_use]
    pub const fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Worker count this dispatcher fans out to.
    #[must_use]
    pub const fn workers(&self) -> usize {
        self.workers
    }

    /// Crawl one batch of block numbers and persist the results.
    ///
    /// A worker's fetch failure is counted and skipped without
    /// disturbing its siblings; persistence is idempotent so
    /// out-of-order completion across workers is safe. Blocks until
    /// every worker has finished.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects a write or a worker task
    /// is lost; exhausted fetch retries are never an error here.
    pub async fn dispatch(&self, numbers: &[u64]) -> Result<DispatchReport> {
        if numbers.is_empty() {
            return Ok(DispatchReport::default());
        }

        if self.workers == 1 {
            return crawl(
                Arc::clone(&self.client),
                Arc::clone(&self.store),
                numbers.to_vec(),
                self.with_transactions,
                self.retry,
                self.verbose,
            )
            .await;
        }

        let slice_len = numbers.len().div_ceil(self.workers);
        let mut tasks = JoinSet::new();
        for slice in numbers.chunks(slice_len) {
            tasks.spawn(crawl(
                Arc::clone(&self.client),
                Arc::clone(&self.store),
                slice.to_vec(),
                self.with_transactions,
                self.retry,
                self.verbose,
            ));
        }

        let mut report = DispatchReport::default();
        while let Some(joined) = tasks.join_next().await {
            report.merge(joined??);
        }
        Ok(report)
    }

    /// Crawl a whole range chunk by chunk, flushing the store after
    /// each chunk joins.
    ///
    /// When a shutdown receiver is supplied it is consulted only at
    /// chunk boundaries; the chunk in flight always runs to
    /// completion.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Dispatcher::dispatch`], plus store
    /// flush errors.
    pub async fn dispatch_range(
        &self,
        range: BlockRange,
        order: ProcessingOrder,
        chunk_size: u64,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> Result<DispatchReport> {
        let mut report = DispatchReport::default();
        for chunk in range.chunks(order, chunk_size) {
            if shutdown.is_some_and(|rx| *rx.borrow()) {
                tracing::info!(range = %range, "shutdown requested, stopping at chunk boundary");
                break;
            }
            let (Some(&first), Some(&last)) = (chunk.first(), chunk.last()) else {
                continue;
            };
            tracing::info!(first, last, blocks = chunk.len(), "adding blocks");
            report.merge(self.dispatch(&chunk).await?);
            self.store.flush().await?;
        }
        Ok(report)
    }
}

/// One worker's serial fetch-and-persist loop.
async fn crawl<C: ChainClient, S: BlockStore>(
    client: Arc<C>,
    store: Arc<S>,
    numbers: Vec<u64>,
    with_transactions: bool,
    retry: RetryPolicy,
    verbose: bool,
) -> Result<DispatchReport> {
    let mut report = DispatchReport::default();
    for number in numbers {
        match with_retry(retry, || client.fetch_block(number, with_transactions)).await {
            Ok(block) => {
                store.upsert_block(block).await?;
                report.stored += 1;
                if verbose {
                    tracing::info!(number, "block stored");
                } else {
                    tracing::trace!(number, "block stored");
                }
            }
            Err(err) => {
                report.skipped += 1;
                tracing::warn!(number, error = %err, "skipping block, retries exhausted");
            }
        }
    }
    Ok(report)
}
