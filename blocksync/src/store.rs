//! Block persistence: the store contract and a Parquet-backed
//! implementation.
//!
//! The engine requires exactly one thing from persistence: idempotent
//! upserts keyed by block number, safe under out-of-order and
//! duplicate writes from parallel workers. [`ParquetStore`] meets that
//! with an in-memory index guarded by a mutex, hydrated from
//! `blocks.parquet` at open and flushed back with an atomic
//! temp-file-then-rename write at chunk boundaries.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};

use arrow_array::{Array, RecordBatch, StringArray, UInt64Array};
use arrow_schema::{ArrowError, DataType, Field, Schema};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::file::properties::WriterProperties;

use crate::error::{Error, Result};
use crate::stream::{PageBoundary, StreamBoundary, paginate};
use crate::types::{BlockRecord, BlockSummary};

/// File name of the block table inside the data directory.
const BLOCKS_FILE: &str = "blocks.parquet";

/// Write access plus the two read queries the engine needs.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Insert or replace one block, keyed by its number.
    async fn upsert_block(&self, block: BlockRecord) -> Result<()>;

    /// The subset of `numbers` already present in the store.
    ///
    /// Answered in one scan; the gap detector relies on this staying a
    /// single logical query per batch.
    async fn existing(&self, numbers: &[u64]) -> Result<HashSet<u64>>;

    /// Highest persisted block number, `None` for an empty store.
    async fn highest_block(&self) -> Result<Option<u64>>;

    /// Make buffered writes durable. Called at chunk boundaries.
    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Blocks whose timestamps fall inside `window`, oldest first,
    /// together with the page boundary for adjacent windows.
    async fn blocks_in_window(
        &self,
        window: &StreamBoundary<DateTime<Utc>>,
    ) -> Result<(Vec<BlockSummary>, PageBoundary<DateTime<Utc>>)>;
}

/// Arrow schema of the block table.
static BLOCK_SCHEMA: LazyLock<Arc<Schema>> = LazyLock::new(|| {
    Arc::new(Schema::new(vec![
        Field::new("number", DataType::UInt64, false),
        Field::new("hash", DataType::Utf8, false),
        Field::new("parent_hash", DataType::Utf8, false),
        Field::new("timestamp", DataType::UInt64, false),
        Field::new("miner", DataType::Utf8, false),
        Field::new("gas_used", DataType::UInt64, false),
        Field::new("gas_limit", DataType::UInt64, false),
        Field::new("base_fee_per_gas", DataType::UInt64, true),
        Field::new("transaction_count", DataType::UInt64, false),
        Field::new("transactions", DataType::Utf8, true),
    ]))
});

/// [`BlockStore`] over a single Parquet file.
#[derive(Debug)]
pub struct ParquetStore {
    path: PathBuf,
    blocks: Mutex<BTreeMap<u64, BlockRecord>>,
}

impl ParquetStore {
    /// Open the block table under `data_dir`, creating the directory
    /// if needed. A missing file is an empty store.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or an
    /// existing file cannot be read or decoded.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join(BLOCKS_FILE);
        let mut blocks = BTreeMap::new();
        for batch in read_batches(&path)? {
            decode_batch(&batch, &mut blocks)?;
        }
        tracing::debug!(path = %path.display(), blocks = blocks.len(), "store opened");
        Ok(Self {
            path,
            blocks: Mutex::new(blocks),
        })
    }

    /// Number of blocks currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the store holds no blocks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u64, BlockRecord>> {
        self.blocks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl BlockStore for ParquetStore {
    async fn upsert_block(&self, block: BlockRecord) -> Result<()> {
        self.lock().insert(block.number, block);
        Ok(())
    }

    async fn existing(&self, numbers: &[u64]) -> Result<HashSet<u64>> {
        let blocks = self.lock();
        Ok(numbers
            .iter()
            .copied()
            .filter(|n| blocks.contains_key(n))
            .collect())
    }

    async fn highest_block(&self) -> Result<Option<u64>> {
        Ok(self.lock().last_key_value().map(|(n, _)| *n))
    }

    async fn flush(&self) -> Result<()> {
        let batch = encode_batch(&self.lock())?;
        write_atomic(&self.path, &batch)?;
        tracing::debug!(path = %self.path.display(), rows = batch.num_rows(), "store flushed");
        Ok(())
    }

    async fn blocks_in_window(
        &self,
        window: &StreamBoundary<DateTime<Utc>>,
    ) -> Result<(Vec<BlockSummary>, PageBoundary<DateTime<Utc>>)> {
        let mut events: Vec<(DateTime<Utc>, BlockSummary)> = self
            .lock()
            .values()
            .map(|block| (block_time(block.timestamp), BlockSummary::from(block)))
            .collect();
        events.sort_by_key(|(t, _)| *t);
        Ok(paginate(&events, window))
    }
}

/// Header timestamps are seconds; out-of-range values clamp rather
/// than fail, a block with a nonsense timestamp is still a block.
fn block_time(timestamp: u64) -> DateTime<Utc> {
    i64::try_from(timestamp)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn read_batches(path: &Path) -> Result<Vec<RecordBatch>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = std::fs::File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    Ok(reader.collect::<std::result::Result<Vec<_>, _>>()?)
}

fn write_atomic(path: &Path, batch: &RecordBatch) -> Result<()> {
    let tmp = path.with_extension("parquet.tmp");
    let file = std::fs::File::create(&tmp)?;

    let props = WriterProperties::builder()
        .set_compression(parquet::basic::Compression::ZSTD(
            parquet::basic::ZstdLevel::try_new(3)?,
        ))
        .build();

    let mut writer = ArrowWriter::try_new(file, Arc::clone(&BLOCK_SCHEMA), Some(props))?;
    writer.write(batch)?;
    writer.close()?;

    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn encode_batch(blocks: &BTreeMap<u64, BlockRecord>) -> Result<RecordBatch> {
    let cap = blocks.len();
    let mut numbers = Vec::with_capacity(cap);
    let mut hashes = Vec::with_capacity(cap);
    let mut parent_hashes = Vec::with_capacity(cap);
    let mut timestamps = Vec::with_capacity(cap);
    let mut miners = Vec::with_capacity(cap);
    let mut gas_useds = Vec::with_capacity(cap);
    let mut gas_limits = Vec::with_capacity(cap);
    let mut base_fees: Vec<Option<u64>> = Vec::with_capacity(cap);
    let mut tx_counts = Vec::with_capacity(cap);
    let mut transactions: Vec<Option<String>> = Vec::with_capacity(cap);

    for block in blocks.values() {
        numbers.push(block.number);
        hashes.push(block.hash.clone());
        parent_hashes.push(block.parent_hash.clone());
        timestamps.push(block.timestamp);
        miners.push(block.miner.clone());
        gas_useds.push(block.gas_used);
        gas_limits.push(block.gas_limit);
        base_fees.push(block.base_fee_per_gas);
        tx_counts.push(block.transaction_count);
        transactions.push(block.transactions.clone());
    }

    Ok(RecordBatch::try_new(
        Arc::clone(&BLOCK_SCHEMA),
        vec![
            Arc::new(UInt64Array::from(numbers)),
            Arc::new(StringArray::from(hashes)),
            Arc::new(StringArray::from(parent_hashes)),
            Arc::new(UInt64Array::from(timestamps)),
            Arc::new(StringArray::from(miners)),
            Arc::new(UInt64Array::from(gas_useds)),
            Arc::new(UInt64Array::from(gas_limits)),
            Arc::new(UInt64Array::from(base_fees)),
            Arc::new(UInt64Array::from(tx_counts)),
            Arc::new(StringArray::from(transactions)),
        ],
    )?)
}

fn decode_batch(batch: &RecordBatch, into: &mut BTreeMap<u64, BlockRecord>) -> Result<()> {
    let numbers = column::<UInt64Array>(batch, 0)?;
    let hashes = column::<StringArray>(batch, 1)?;
    let parent_hashes = column::<StringArray>(batch, 2)?;
    let timestamps = column::<UInt64Array>(batch, 3)?;
    let miners = column::<StringArray>(batch, 4)?;
    let gas_useds = column::<UInt64Array>(batch, 5)?;
    let gas_limits = column::<UInt64Array>(batch, 6)?;
    let base_fees = column::<UInt64Array>(batch, 7)?;
    let tx_counts = column::<UInt64Array>(batch, 8)?;
    let transactions = column::<StringArray>(batch, 9)?;

    for row in 0..batch.num_rows() {
        let block = BlockRecord {
            number: numbers.value(row),
            hash: hashes.value(row).to_owned(),
            parent_hash: parent_hashes.value(row).to_owned(),
            timestamp: timestamps.value(row),
            miner: miners.value(row).to_owned(),
            gas_used: gas_useds.value(row),
            gas_limit: gas_limits.value(row),
            base_fee_per_gas: (!base_fees.is_null(row)).then(|| base_fees.value(row)),
            transaction_count: tx_counts.value(row),
            transactions: (!transactions.is_null(row)).then(|| transactions.value(row).to_owned()),
        };
        into.insert(block.number, block);
    }
    Ok(())
}

fn column<'a, A: 'static>(batch: &'a RecordBatch, index: usize) -> Result<&'a A> {
    batch
        .column(index)
        .as_any()
        .downcast_ref::<A>()
        .ok_or_else(|| {
            Error::Arrow(ArrowError::SchemaError(format!(
                "unexpected column type at index {index}"
            )))
        })
}
