//! Remote chain source abstraction and its JSON-RPC implementation.
//!
//! The engine only ever talks to the node through [`ChainClient`], so
//! tests run against in-process fakes and the sync loop stays agnostic
//! of the transport.

use std::time::Duration;

use alloy::providers::Provider;
use alloy::rpc::types::Block;
use alloy::transports::TransportErrorKind;
use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::types::BlockRecord;

/// Per-request timeout for RPC calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Read access to the remote chain.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Height of the newest block known to the node.
    async fn latest_block_number(&self) -> Result<u64>;

    /// Fetch one block, optionally hydrated with its transaction list.
    ///
    /// A block the node does not have is an error
    /// ([`Error::BlockNotFound`]); the retry layer treats it like any
    /// other failed attempt.
    async fn fetch_block(&self, number: u64, with_transactions: bool) -> Result<BlockRecord>;

    /// The sync target: the latest block minus the confirmation
    /// cushion against short reorganizations near the head.
    async fn confirmed_tip(&self, confirmations: u64) -> Result<u64> {
        Ok(self
            .latest_block_number()
            .await?
            .saturating_sub(confirmations))
    }
}

/// [`ChainClient`] over an alloy HTTP provider.
#[derive(Debug, Clone)]
pub struct RpcChainClient<P> {
    provider: P,
}

impl<P: Provider> RpcChainClient<P> {
    /// Wrap an already-connected provider.
    pub const fn new(provider: P) -> Self {
        Self { provider }
    }
}

/// Bound a provider call with [`REQUEST_TIMEOUT`].
async fn timed<T>(
    call: impl IntoFuture<Output = alloy::transports::TransportResult<T>>,
) -> Result<T> {
    let value = tokio::time::timeout(REQUEST_TIMEOUT, call)
        .await
        .map_err(|_| TransportErrorKind::custom_str("request timed out"))??;
    Ok(value)
}

#[async_trait]
impl<P: Provider> ChainClient for RpcChainClient<P> {
    async fn latest_block_number(&self) -> Result<u64> {
        timed(self.provider.get_block_number()).await
    }

    async fn fetch_block(&self, number: u64, with_transactions: bool) -> Result<BlockRecord> {
        let request = self.provider.get_block_by_number(number.into());
        let fetched = if with_transactions {
            timed(request.full()).await?
        } else {
            timed(request.hashes()).await?
        };
        let block = fetched.ok_or(Error::BlockNotFound(number))?;
        to_record(&block)
    }
}

/// Flatten an RPC block into the stored representation.
fn to_record(block: &Block) -> Result<BlockRecord> {
    let header = &block.header;
    let transactions = block
        .transactions
        .as_transactions()
        .map(serde_json::to_string)
        .transpose()?;

    #[allow(clippy::cast_possible_truncation)]
    let transaction_count = block.transactions.len() as u64;

    Ok(BlockRecord {
        number: header.number,
        hash: format!("{:#x}", header.hash),
        parent_hash: format!("{:#x}", header.parent_hash),
        timestamp: header.timestamp,
        miner: format!("{:#x}", header.beneficiary),
        gas_used: header.gas_used,
        gas_limit: header.gas_limit,
        base_fee_per_gas: header.base_fee_per_gas,
        transaction_count,
        transactions,
    })
}
