//! In-process fakes for the chain-client and store seams, shared by
//! the engine's unit tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::client::ChainClient;
use crate::error::{Error, Result};
use crate::store::BlockStore;
use crate::stream::{PageBoundary, StreamBoundary, paginate};
use crate::types::{BlockRecord, BlockSummary};

/// A deterministic block for height `n` (12-second block times).
pub(crate) fn block(n: u64) -> BlockRecord {
    BlockRecord {
        number: n,
        hash: format!("0x{n:064x}"),
        parent_hash: format!("0x{:064x}", n.saturating_sub(1)),
        timestamp: 1_700_000_000 + n * 12,
        miner: format!("0x{:040x}", 0xfeed_u64),
        gas_used: 21_000,
        gas_limit: 30_000_000,
        base_fee_per_gas: None,
        transaction_count: 0,
        transactions: None,
    }
}

fn injected_failure() -> Error {
    Error::Rpc(alloy::transports::TransportErrorKind::custom_str(
        "injected failure",
    ))
}

/// Scriptable [`ChainClient`] with per-block failure injection.
#[derive(Debug, Default)]
pub(crate) struct FakeClient {
    tip: AtomicU64,
    tip_calls: AtomicU64,
    tip_failures: AtomicU64,
    /// Remaining failures per block; `u32::MAX` fails forever.
    failures: Mutex<HashMap<u64, u32>>,
    fetched: Mutex<Vec<u64>>,
}

impl FakeClient {
    pub(crate) fn with_tip(tip: u64) -> Self {
        let client = Self::default();
        client.tip.store(tip, Ordering::SeqCst);
        client
    }

    pub(crate) fn set_tip(&self, tip: u64) {
        self.tip.store(tip, Ordering::SeqCst);
    }

    pub(crate) fn fail_block(&self, number: u64) {
        self.fail_block_times(number, u32::MAX);
    }

    pub(crate) fn fail_block_times(&self, number: u64, times: u32) {
        let mut failures = self.failures.lock().unwrap();
        failures.insert(number, times);
    }

    pub(crate) fn fail_tip_times(&self, times: u64) {
        self.tip_failures.store(times, Ordering::SeqCst);
    }

    pub(crate) fn tip_calls(&self) -> u64 {
        self.tip_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn fetched(&self) -> Vec<u64> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainClient for FakeClient {
    async fn latest_block_number(&self) -> Result<u64> {
        self.tip_calls.fetch_add(1, Ordering::SeqCst);
        if self
            .tip_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(injected_failure());
        }
        Ok(self.tip.load(Ordering::SeqCst))
    }

    async fn fetch_block(&self, number: u64, _with_transactions: bool) -> Result<BlockRecord> {
        self.fetched.lock().unwrap().push(number);
        let mut failures = self.failures.lock().unwrap();
        if let Some(remaining) = failures.get_mut(&number) {
            if *remaining == u32::MAX {
                return Err(injected_failure());
            }
            if *remaining > 0 {
                *remaining -= 1;
                return Err(injected_failure());
            }
        }
        Ok(block(number))
    }
}

/// In-memory [`BlockStore`] that counts flushes.
#[derive(Debug, Default)]
pub(crate) struct FakeStore {
    blocks: Mutex<BTreeMap<u64, BlockRecord>>,
    flushes: AtomicU64,
}

impl FakeStore {
    pub(crate) fn with_blocks(numbers: impl IntoIterator<Item = u64>) -> Self {
        let store = Self::default();
        {
            let mut blocks = store.blocks.lock().unwrap();
            for n in numbers {
                blocks.insert(n, block(n));
            }
        }
        store
    }

    pub(crate) fn stored(&self) -> Vec<u64> {
        self.blocks.lock().unwrap().keys().copied().collect()
    }

    pub(crate) fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlockStore for FakeStore {
    async fn upsert_block(&self, block: BlockRecord) -> Result<()> {
        self.blocks.lock().unwrap().insert(block.number, block);
        Ok(())
    }

    async fn existing(&self, numbers: &[u64]) -> Result<HashSet<u64>> {
        let blocks = self.blocks.lock().unwrap();
        Ok(numbers
            .iter()
            .copied()
            .filter(|n| blocks.contains_key(n))
            .collect())
    }

    async fn highest_block(&self) -> Result<Option<u64>> {
        Ok(self.blocks.lock().unwrap().last_key_value().map(|(n, _)| *n))
    }

    async fn flush(&self) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn blocks_in_window(
        &self,
        window: &StreamBoundary<DateTime<Utc>>,
    ) -> Result<(Vec<BlockSummary>, PageBoundary<DateTime<Utc>>)> {
        let mut events: Vec<(DateTime<Utc>, BlockSummary)> = self
            .blocks
            .lock()
            .unwrap()
            .values()
            .filter_map(|b| {
                let t = DateTime::from_timestamp(i64::try_from(b.timestamp).ok()?, 0)?;
                Some((t, BlockSummary::from(b)))
            })
            .collect();
        events.sort_by_key(|(t, _)| *t);
        Ok(paginate(&events, window))
    }
}
