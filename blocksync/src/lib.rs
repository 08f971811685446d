//! Ethereum block synchronization and gap-repair engine.
//!
//! Keeps a local Parquet-backed copy of a chain's blocks eventually
//! consistent with a remote node: a confirmation-aware sync loop
//! follows the tip, a one-shot backfill controller repairs gaps in
//! already-passed ranges, and every remote fetch goes through bounded
//! retries with exponential backoff. Work is dispatched in bounded
//! chunks across a joinable worker pool, and all time-ranged reads
//! share one window/pagination contract.

pub mod backfill;
pub mod client;
pub mod dispatch;
pub mod error;
pub mod gaps;
pub mod retry;
pub mod store;
pub mod stream;
pub mod sync;
pub mod telemetry;
pub mod types;

#[cfg(test)]
mod testutil;

pub use error::{Error, Result};
