//! The long-running tip-tracking synchronizer.
//!
//! A single-threaded controller that forever alternates between three
//! states: fetch the confirmed tip, dispatch the not-yet-persisted
//! range chunk by chunk, and back off when there is nothing new. The
//! backoff sleep is the loop's backpressure: it never busy-spins
//! against an unchanging tip. Shutdown is cooperative and observed at
//! chunk boundaries only, so the chunk in flight always completes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::client::ChainClient;
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::store::BlockStore;
use crate::types::{BlockRange, DEFAULT_CHUNK_SIZE, ProcessingOrder};

/// Tuning for the sync loop.
#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    /// Floor below which blocks are never requested.
    pub start_block: u64,
    /// Confirmation cushion subtracted from the remote tip.
    pub confirmations: u64,
    /// Direction blocks are dispatched in within each pass.
    pub order: ProcessingOrder,
    /// Blocks per dispatched chunk.
    pub chunk_size: u64,
    /// Sleep between tip checks when already caught up.
    pub poll_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            start_block: 0,
            confirmations: 0,
            order: ProcessingOrder::Descending,
            chunk_size: DEFAULT_CHUNK_SIZE,
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// Loop states. There is no terminal state; the loop runs until the
/// shutdown signal or a storage failure.
#[derive(Debug)]
enum SyncState {
    /// Ask the remote for the confirmed tip and compute the gap.
    FetchTip,
    /// Crawl the computed range.
    Dispatch(BlockRange),
    /// Nothing new; sleep one poll interval.
    Backoff,
}

/// The sync-loop controller.
#[derive(Debug)]
pub struct Syncer<C, S> {
    client: Arc<C>,
    store: Arc<S>,
    dispatcher: Dispatcher<C, S>,
    config: SyncConfig,
}

impl<C, S> Syncer<C, S>
where
    C: ChainClient + 'static,
    S: BlockStore + 'static,
{
    /// Assemble a syncer from its collaborators.
    pub const fn new(
        client: Arc<C>,
        store: Arc<S>,
        dispatcher: Dispatcher<C, S>,
        config: SyncConfig,
    ) -> Self {
        Self {
            client,
            store,
            dispatcher,
            config,
        }
    }

    /// Run until `shutdown` flips to `true`.
    ///
    /// Transient tip-fetch failures are logged and absorbed into a
    /// backoff; the loop only exits with an error when persistence
    /// itself fails.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects a write or flush.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut state = SyncState::FetchTip;
        loop {
            if *shutdown.borrow() {
                tracing::info!("sync loop stopped");
                return Ok(());
            }
            state = match state {
                SyncState::FetchTip => self.fetch_tip().await?,
                SyncState::Dispatch(range) => {
                    let report = self
                        .dispatcher
                        .dispatch_range(
                            range,
                            self.config.order,
                            self.config.chunk_size,
                            Some(&shutdown),
                        )
                        .await?;
                    tracing::info!(
                        range = %range,
                        stored = report.stored,
                        skipped = report.skipped,
                        "synchronized blocks"
                    );
                    SyncState::FetchTip
                }
                SyncState::Backoff => {
                    tokio::select! {
                        () = tokio::time::sleep(self.config.poll_interval) => {}
                        _ = shutdown.changed() => {}
                    }
                    SyncState::FetchTip
                }
            };
        }
    }

    /// One tip check: decide between dispatching and backing off.
    async fn fetch_tip(&self) -> Result<SyncState> {
        let top = match self.client.confirmed_tip(self.config.confirmations).await {
            Ok(top) => top,
            Err(err) => {
                tracing::warn!(error = %err, "tip fetch failed, backing off");
                return Ok(SyncState::Backoff);
            }
        };
        let bottom = self.store.highest_block().await?.map_or(
            self.config.start_block,
            |highest| (highest + 1).max(self.config.start_block),
        );

        if bottom >= top {
            tracing::debug!(bottom, top, "synchronization unnecessary");
            Ok(SyncState::Backoff)
        } else {
            tracing::info!(bottom, top, "synchronizing");
            // Dispatch [bottom, top): the tip itself is re-checked on
            // the next pass.
            Ok(SyncState::Dispatch(BlockRange::new(bottom, top - 1)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FakeClient, FakeStore};

    fn syncer(
        client: &Arc<FakeClient>,
        store: &Arc<FakeStore>,
        config: SyncConfig,
    ) -> Syncer<FakeClient, FakeStore> {
        let dispatcher = Dispatcher::new(Arc::clone(client), Arc::clone(store), 2, false);
        Syncer::new(Arc::clone(client), Arc::clone(store), dispatcher, config)
    }

    #[tokio::test(start_paused = true)]
    async fn static_tip_backs_off_without_dispatching() {
        let client = Arc::new(FakeClient::with_tip(100));
        let store = Arc::new(FakeStore::with_blocks([98, 99, 100]));
        let s = syncer(&client, &store, SyncConfig::default());
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { s.run(rx).await });
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert!(client.fetched().is_empty(), "dispatcher must not run");
        assert!(client.tip_calls() > 2, "loop should keep polling the tip");

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn syncs_confirmed_range_then_backs_off() {
        let client = Arc::new(FakeClient::with_tip(20));
        let store = Arc::new(FakeStore::default());
        let config = SyncConfig {
            start_block: 10,
            confirmations: 5,
            chunk_size: 3,
            ..SyncConfig::default()
        };
        let s = syncer(&client, &store, config);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { s.run(rx).await });
        tokio::time::sleep(Duration::from_secs(30)).await;

        // Confirmed tip is 15; [10, 15) is crawled, 15 itself is not.
        assert_eq!(store.stored(), vec![10, 11, 12, 13, 14]);
        assert!(store.flushes() >= 1);

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn picks_up_where_the_store_left_off() {
        let client = Arc::new(FakeClient::with_tip(10));
        let store = Arc::new(FakeStore::with_blocks(0..=6));
        let s = syncer(&client, &store, SyncConfig::default());
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { s.run(rx).await });
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(store.stored(), (0..=9).collect::<Vec<_>>());

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn transient_tip_failures_do_not_stop_the_loop() {
        let client = Arc::new(FakeClient::with_tip(10));
        client.fail_tip_times(2);
        let store = Arc::new(FakeStore::default());
        let s = syncer(&client, &store, SyncConfig::default());
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { s.run(rx).await });
        tokio::time::sleep(Duration::from_secs(60)).await;

        // Two failed polls, then a successful one crawled [0, 10).
        assert_eq!(store.stored(), (0..=9).collect::<Vec<_>>());

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn tip_advance_is_followed() {
        let client = Arc::new(FakeClient::with_tip(5));
        let store = Arc::new(FakeStore::default());
        let s = syncer(&client, &store, SyncConfig::default());
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { s.run(rx).await });
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(store.stored(), (0..=4).collect::<Vec<_>>());

        client.set_tip(8);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(store.stored(), (0..=7).collect::<Vec<_>>());

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }
}
