//! Missing-block detection.

use crate::error::Result;
use crate::store::BlockStore;

/// The subset of `numbers` absent from the store, in request order.
///
/// A pure read: one `existing` query per batch, no per-number round
/// trips and no side effects. Recomputed on every backfill pass,
/// never cached.
///
/// # Errors
///
/// Returns an error if the store query fails.
pub async fn find_missing<S: BlockStore + ?Sized>(store: &S, numbers: &[u64]) -> Result<Vec<u64>> {
    let present = store.existing(numbers).await?;
    Ok(numbers
        .iter()
        .copied()
        .filter(|n| !present.contains(n))
        .collect())
}
