//! Crate-wide error type.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// All failure modes of the sync engine.
///
/// Transient fetch failures ([`Error::Rpc`], [`Error::BlockNotFound`])
/// are absorbed by the retry layer and skipped by the dispatcher;
/// storage failures propagate and terminate the current run.
#[derive(Debug, Error)]
pub enum Error {
    /// A block range string did not match the `{low}-{high}` format.
    #[error("invalid block range {0:?}: expected {{low}}-{{high}}, e.g. 105-340")]
    InvalidRange(String),

    /// An unknown processing order keyword was supplied.
    #[error("invalid processing order {0:?}: valid choices are \"asc\" and \"desc\"")]
    InvalidOrder(String),

    /// A stream window was constructed with `start > end`.
    #[error("invalid stream window: start {start} is after end {end}")]
    InvalidWindow {
        /// Requested window start.
        start: String,
        /// Requested window end.
        end: String,
    },

    /// The remote node reported no block at the requested height.
    #[error("block {0} not available from the remote node")]
    BlockNotFound(u64),

    /// RPC transport or node error.
    #[error("rpc: {0}")]
    Rpc(#[from] alloy::transports::TransportError),

    /// Filesystem error from the block store.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Parquet encode/decode error.
    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Arrow batch construction error.
    #[error(transparent)]
    Arrow(#[from] arrow_schema::ArrowError),

    /// JSON (de)serialization error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// A dispatcher worker task panicked or was cancelled.
    #[error("worker task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
