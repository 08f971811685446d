//! Block ranges, processing order and the range chunker.
//!
//! A [`BlockRange`] is inclusive at both ends and normalizes swapped
//! endpoints, so `"340-105"` and `"105-340"` describe the same range.
//! [`BlockRange::chunks`] splits a range into bounded batches that the
//! dispatcher processes one at a time, which caps in-flight work and
//! limits how much is lost if a run is interrupted.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Default number of blocks per dispatched chunk.
pub const DEFAULT_CHUNK_SIZE: u64 = 1000;

/// Direction in which a range is iterated and dispatched.
///
/// Descending keeps the crawler near the chain tip first; ascending is
/// the natural order for historical backfills.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProcessingOrder {
    /// Highest block first.
    #[default]
    Descending,
    /// Lowest block first.
    Ascending,
}

impl FromStr for ProcessingOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asc" => Ok(Self::Ascending),
            "desc" => Ok(Self::Descending),
            other => Err(Error::InvalidOrder(other.to_owned())),
        }
    }
}

impl fmt::Display for ProcessingOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ascending => f.write_str("asc"),
            Self::Descending => f.write_str("desc"),
        }
    }
}

/// An inclusive range of block numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRange {
    /// Lowest block in the range.
    pub low: u64,
    /// Highest block in the range (inclusive).
    pub high: u64,
}

impl BlockRange {
    /// Build a range from two endpoints, given in either order.
    #[must_use]
    pub fn new(a: u64, b: u64) -> Self {
        Self {
            low: a.min(b),
            high: a.max(b),
        }
    }

    /// Number of blocks in the range.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.high - self.low + 1
    }

    /// A range always contains at least one block.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Split the range into batches of at most `chunk_size` blocks.
    ///
    /// The iterator is lazy and restartable: aborting it early never
    /// affects chunks already produced. Concatenating every chunk (in
    /// iteration order) yields each block in the range exactly once,
    /// running in the requested direction. `chunk_size` is clamped
    /// to at least 1.
    #[must_use]
    pub fn chunks(&self, order: ProcessingOrder, chunk_size: u64) -> Chunks {
        let cursor = match order {
            ProcessingOrder::Ascending => self.low,
            ProcessingOrder::Descending => self.high,
        };
        Chunks {
            range: *self,
            order,
            chunk_size: chunk_size.max(1),
            cursor: Some(cursor),
        }
    }
}

impl FromStr for BlockRange {
    type Err = Error;

    /// Parse the literal `"{low}-{high}"` format used on the CLI.
    ///
    /// Endpoints may be given in either order.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || Error::InvalidRange(s.to_owned());
        let (a, b) = s.split_once('-').ok_or_else(malformed)?;
        let a: u64 = a.trim().parse().map_err(|_| malformed())?;
        let b: u64 = b.trim().parse().map_err(|_| malformed())?;
        Ok(Self::new(a, b))
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.low, self.high)
    }
}

/// Lazy iterator over the chunks of a [`BlockRange`].
///
/// State is a single cursor, so a consumer may stop at any chunk
/// boundary (e.g. on shutdown) without invalidating prior chunks.
#[derive(Debug, Clone)]
pub struct Chunks {
    range: BlockRange,
    order: ProcessingOrder,
    chunk_size: u64,
    cursor: Option<u64>,
}

impl Iterator for Chunks {
    type Item = Vec<u64>;

    fn next(&mut self) -> Option<Self::Item> {
        let cursor = self.cursor?;
        match self.order {
            ProcessingOrder::Ascending => {
                let end = cursor
                    .saturating_add(self.chunk_size - 1)
                    .min(self.range.high);
                self.cursor = (end < self.range.high).then(|| end + 1);
                Some((cursor..=end).collect())
            }
            ProcessingOrder::Descending => {
                let end = cursor
                    .saturating_sub(self.chunk_size - 1)
                    .max(self.range.low);
                self.cursor = (end > self.range.low).then(|| end - 1);
                Some((end..=cursor).rev().collect())
            }
        }
    }
}

/// One crawled block as persisted by the store.
///
/// Transactions, when requested, are kept as a JSON-encoded list so the
/// store schema stays flat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    /// Block height.
    pub number: u64,
    /// Block hash, `0x`-prefixed.
    pub hash: String,
    /// Parent block hash, `0x`-prefixed.
    pub parent_hash: String,
    /// Unix timestamp (seconds) from the block header.
    pub timestamp: u64,
    /// Coinbase / fee recipient address.
    pub miner: String,
    /// Total gas used by the block.
    pub gas_used: u64,
    /// Block gas limit.
    pub gas_limit: u64,
    /// EIP-1559 base fee, absent on pre-London blocks.
    pub base_fee_per_gas: Option<u64>,
    /// Number of transactions in the block.
    pub transaction_count: u64,
    /// JSON-encoded transaction list, absent when crawled with
    /// `--notransactions`.
    pub transactions: Option<String>,
}

/// Compact block projection returned by windowed listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSummary {
    /// Block height.
    pub number: u64,
    /// Block hash, `0x`-prefixed.
    pub hash: String,
    /// Unix timestamp (seconds).
    pub timestamp: u64,
    /// Number of transactions in the block.
    pub transaction_count: u64,
}

impl From<&BlockRecord> for BlockSummary {
    fn from(block: &BlockRecord) -> Self {
        Self {
            number: block.number,
            hash: block.hash.clone(),
            timestamp: block.timestamp,
            transaction_count: block.transaction_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(range: BlockRange, order: ProcessingOrder, size: u64) -> Vec<Vec<u64>> {
        range.chunks(order, size).collect()
    }

    #[test]
    fn descending_chunks_cover_range() {
        let chunks = collect(BlockRange::new(105, 110), ProcessingOrder::Descending, 3);
        assert_eq!(chunks, vec![vec![110, 109, 108], vec![107, 106, 105]]);
    }

    #[test]
    fn ascending_chunks_cover_range() {
        let chunks = collect(BlockRange::new(105, 110), ProcessingOrder::Ascending, 4);
        assert_eq!(chunks, vec![vec![105, 106, 107, 108], vec![109, 110]]);
    }

    #[test]
    fn chunk_concatenation_reconstructs_range_exactly_once() {
        let range = BlockRange::new(0, 2500);
        for order in [ProcessingOrder::Ascending, ProcessingOrder::Descending] {
            let all: Vec<u64> = range.chunks(order, 1000).flatten().collect();
            assert_eq!(all.len() as u64, range.len());
            let mut sorted = all.clone();
            sorted.sort_unstable();
            sorted.dedup();
            assert_eq!(sorted.len() as u64, range.len(), "order {order}");
            assert_eq!(sorted.first(), Some(&0));
            assert_eq!(sorted.last(), Some(&2500));
        }
    }

    #[test]
    fn swapped_endpoints_chunk_identically() {
        let forward: BlockRange = "105-340".parse().unwrap();
        let backward: BlockRange = "340-105".parse().unwrap();
        assert_eq!(forward, backward);
        let a: Vec<_> = forward.chunks(ProcessingOrder::Descending, 100).collect();
        let b: Vec<_> = backward.chunks(ProcessingOrder::Descending, 100).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn single_block_range_yields_one_chunk() {
        let chunks = collect(BlockRange::new(7, 7), ProcessingOrder::Descending, 1000);
        assert_eq!(chunks, vec![vec![7]]);
    }

    #[test]
    fn zero_chunk_size_is_clamped() {
        let chunks = collect(BlockRange::new(1, 3), ProcessingOrder::Ascending, 0);
        assert_eq!(chunks, vec![vec![1], vec![2], vec![3]]);
    }

    #[test]
    fn range_starting_at_zero_descends_without_underflow() {
        let chunks = collect(BlockRange::new(0, 4), ProcessingOrder::Descending, 3);
        assert_eq!(chunks, vec![vec![4, 3, 2], vec![1, 0]]);
    }

    #[test]
    fn malformed_range_strings_are_rejected() {
        for bad in ["", "105", "abc-340", "105-", "-340", "105_340"] {
            assert!(
                bad.parse::<BlockRange>().is_err(),
                "{bad:?} should not parse"
            );
        }
    }

    #[test]
    fn order_keywords_parse() {
        assert_eq!(
            "asc".parse::<ProcessingOrder>().unwrap(),
            ProcessingOrder::Ascending
        );
        assert_eq!(
            "desc".parse::<ProcessingOrder>().unwrap(),
            ProcessingOrder::Descending
        );
        assert!("up".parse::<ProcessingOrder>().is_err());
    }
}
