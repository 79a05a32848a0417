//! Materializing application state from a statechain's diff history.
//!
//! Every statechain block references the diff that produced its state. Walking the
//! `prev_block_hash` links back to the image's genesis block and folding those diffs,
//! oldest first, over the empty genesis state yields the state at any block.

use crate::blockchain::{Diff, StatechainBlock};
use crate::differ::DiffEngine;
use crate::error::{ChainError, Result};
use crate::hashing::Hash;
use crate::persistence::BlockStore;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Diffs from the image's genesis block up to and including `block`, oldest first.
pub async fn gather_diffs(
    store: &BlockStore,
    block: &StatechainBlock,
    cancel: &CancellationToken,
) -> Result<Vec<Diff>> {
    let mut diffs = vec![store.get_diff(&block.state_prev_diff_hash).await?];

    let mut head = block.clone();
    while !head.is_genesis() {
        if cancel.is_cancelled() {
            return Err(ChainError::Cancelled);
        }

        let prev_hash = head.prev_block_hash.ok_or_else(|| {
            ChainError::BrokenChain(format!(
                "statechain block {} of {} has no previous hash",
                head.block_number, head.image_hash
            ))
        })?;
        let prev = store.get_statechain_block(&prev_hash).await?;

        if prev.image_hash != head.image_hash {
            return Err(ChainError::BrokenChain(format!(
                "statechain block {} links into image {}",
                prev_hash, prev.image_hash
            )));
        }
        if prev.block_number.checked_add(1) != Some(head.block_number) {
            return Err(ChainError::BrokenChain(format!(
                "statechain block {} is number {}, expected {}",
                prev_hash,
                prev.block_number,
                head.block_number.saturating_sub(1)
            )));
        }

        diffs.push(store.get_diff(&prev.state_prev_diff_hash).await?);
        head = prev;
    }

    diffs.reverse();
    Ok(diffs)
}

/// Applies `diffs` in order to `genesis_state` by combining them into one patch.
pub async fn generate_state(
    differ: &dyn DiffEngine,
    image_hash: &Hash,
    genesis_state: &[u8],
    diffs: &[Diff],
) -> Result<Vec<u8>> {
    let (first, rest) = diffs.split_first().ok_or(ChainError::NoDiffs)?;

    let mut combined = first.data.clone();
    for diff in rest {
        combined = differ.combine(&combined, &diff.data).await?;
    }
    debug!(image = %image_hash, diffs = diffs.len(), "generating state");

    differ.patch(genesis_state, &combined).await
}

/// State of the application right after `block`.
pub async fn state_at(
    store: &BlockStore,
    differ: &dyn DiffEngine,
    block: &StatechainBlock,
    cancel: &CancellationToken,
) -> Result<Vec<u8>> {
    let diffs = gather_diffs(store, block, cancel).await?;
    generate_state(differ, &block.image_hash, &[], &diffs).await
}
