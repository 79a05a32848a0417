//! Per-application state building: turns one image's pending transactions into
//! statechain blocks and diffs.

use crate::blockchain::{Diff, Entity, MainchainBlock, StatechainBlock};
use crate::context::EngineContext;
use crate::differ::{diff_or_empty, DiffEngine};
use crate::error::{ChainError, Result};
use crate::hashing::{hash, Hash};
use crate::reconstruct::state_at;
use crate::transaction::{Method, Transaction};
use std::sync::Arc;
use tracing::{debug, warn};

/// Called with the hash of a transaction that must never be retried.
pub type RemoveTx = Arc<dyn Fn(&Hash) + Send + Sync>;

/// Everything one image contributes to a block.
#[derive(Debug, Default)]
pub struct AppBuild {
    pub blocks: Vec<StatechainBlock>,
    pub transactions: Vec<Transaction>,
    pub diffs: Vec<Diff>,
}

/// Genesis statechain block for a deploy: the state is the payload itself.
pub async fn build_genesis_block(
    differ: &dyn DiffEngine,
    deploy: &Transaction,
    block_time: u64,
) -> Result<(StatechainBlock, Diff)> {
    let tx_hash = deploy.require_hash()?;
    let diff = Diff::new(diff_or_empty(differ, &[], &deploy.payload).await?);

    let mut block = StatechainBlock {
        block_hash: None,
        block_number: 0,
        block_time,
        image_hash: deploy.image_hash,
        tx_hash,
        prev_block_hash: None,
        state_prev_diff_hash: diff.require_hash()?,
        state_current_hash: hash(&deploy.payload),
    };
    block.set_hash();
    Ok((block, diff))
}

/// Successor of `prev` produced by running `tx` against `state`. Returns the block,
/// its diff, and the new state.
pub async fn build_next_block(
    ctx: &EngineContext,
    prev: &StatechainBlock,
    state: &[u8],
    tx: &Transaction,
    block_time: u64,
) -> Result<(StatechainBlock, Diff, Vec<u8>)> {
    let next_state = ctx
        .sandbox
        .apply(&tx.image_hash, &tx.payload, state)
        .await?;
    let diff = Diff::new(diff_or_empty(ctx.differ.as_ref(), state, &next_state).await?);

    let block_number = prev.block_number.checked_add(1).ok_or_else(|| {
        ChainError::InvalidBlock(format!(
            "statechain block {} of image {} has no successor",
            prev.block_number, prev.image_hash
        ))
    })?;
    let mut block = StatechainBlock {
        block_hash: None,
        block_number,
        block_time,
        image_hash: prev.image_hash,
        tx_hash: tx.require_hash()?,
        prev_block_hash: prev.block_hash,
        state_prev_diff_hash: diff.require_hash()?,
        state_current_hash: hash(&next_state),
    };
    block.set_hash();
    Ok((block, diff, next_state))
}

/// Builds the statechain extension for one image from its pending transactions,
/// in scan order.
pub async fn build_app(
    ctx: &EngineContext,
    image_hash: Hash,
    mut transactions: Vec<Transaction>,
    head: &MainchainBlock,
    block_time: u64,
    remove_tx: Option<&RemoveTx>,
) -> Result<AppBuild> {
    let prior = ctx.store.most_recent_state_block(&image_hash, head).await?;
    let mut build = AppBuild::default();

    // A deploy is only acceptable as the very first transaction of an image.
    let mut genesis: Option<Transaction> = None;
    let mut rest = Vec::with_capacity(transactions.len());
    for tx in transactions.drain(..) {
        if tx.method != Method::Deploy {
            rest.push(tx);
        } else if prior.is_none() && genesis.is_none() {
            genesis = Some(tx);
        } else {
            let err = ChainError::InvalidTransaction(format!(
                "image {} already has a genesis block",
                image_hash
            ));
            let tx_hash = tx.require_hash()?;
            warn!(image = %image_hash, tx = %tx_hash, error = %err, "dropping duplicate deploy");
            if let Some(remove) = remove_tx {
                remove(&tx_hash);
            }
        }
    }

    let (mut prev, mut state) = match (genesis, prior) {
        (Some(deploy), _) => {
            let (block, diff) =
                build_genesis_block(ctx.differ.as_ref(), &deploy, block_time).await?;
            debug!(image = %image_hash, block = ?block.block_hash, "built genesis statechain block");
            let state = deploy.payload.clone();
            build.blocks.push(block.clone());
            build.diffs.push(diff);
            build.transactions.push(deploy);
            (block, state)
        }
        (None, Some(prior)) => {
            let state = state_at(&ctx.store, ctx.differ.as_ref(), &prior, &ctx.cancel).await?;
            (prior, state)
        }
        (None, None) => {
            if rest.is_empty() {
                return Ok(build);
            }
            return Err(ChainError::InvalidTransaction(format!(
                "image {} has no genesis block",
                image_hash
            )));
        }
    };

    for tx in rest {
        ctx.check_cancelled()?;
        let (block, diff, next_state) = build_next_block(ctx, &prev, &state, &tx, block_time).await?;
        build.blocks.push(block.clone());
        build.diffs.push(diff);
        build.transactions.push(tx);
        prev = block;
        state = next_state;
    }

    debug!(image = %image_hash, blocks = build.blocks.len(), "built statechain blocks");
    Ok(build)
}
