//! Step 7: re-executing one image's statechain blocks.

use super::{ensure, Checked, Failure, Rejection, Step};
use crate::blockchain::{Diff, Entity, StatechainBlock};
use crate::context::EngineContext;
use crate::hashing::{hash, Hash};
use crate::miner::states::{build_genesis_block, build_next_block};
use crate::miner::MinedBlock;
use crate::reconstruct::state_at;
use crate::transaction::{Method, Transaction};
use tracing::debug;

fn submitted_tx<'a>(
    mined: &'a MinedBlock,
    block: &StatechainBlock,
) -> Result<&'a Transaction, Failure> {
    mined.transactions.get(&block.tx_hash).ok_or_else(|| {
        Failure::Invalid(Rejection {
            step: Step::Replay,
            reason: format!("transaction {} not submitted", block.tx_hash),
        })
    })
}

fn matches_submitted(
    mined: &MinedBlock,
    submitted: &StatechainBlock,
    rebuilt: &StatechainBlock,
    diff: &Diff,
) -> Checked {
    ensure(rebuilt.block_hash == submitted.block_hash, Step::Replay, || {
        format!(
            "statechain block {} of image {} does not match re-execution",
            submitted.block_number, submitted.image_hash
        )
    })?;
    let diff_hash = diff.require_hash()?;
    ensure(
        mined.diffs.get(&diff_hash).map(|d| d.data.as_str()) == Some(diff.data.as_str()),
        Step::Replay,
        || format!("diff {} not submitted", diff_hash),
    )
}

/// Rebuilds every block in `blocks` (sorted by block number) and compares each with
/// the submitted one.
pub(super) async fn replay_image(
    ctx: &EngineContext,
    mined: &MinedBlock,
    image_hash: Hash,
    blocks: Vec<StatechainBlock>,
) -> Checked {
    let mut blocks = blocks.into_iter();
    let first = match blocks.next() {
        Some(first) => first,
        None => return Ok(()),
    };

    let (mut prev, mut state) = if first.is_genesis() {
        let tx = submitted_tx(mined, &first)?;
        ensure(tx.method == Method::Deploy, Step::Replay, || {
            format!("genesis of image {} is not built from a deploy", image_hash)
        })?;
        tx.verify(ctx.signer.as_ref())?;
        let prior = ctx
            .store
            .most_recent_state_block(&image_hash, &mined.previous_block)
            .await?;
        ensure(prior.is_none(), Step::Replay, || {
            format!("image {} already has a genesis block", image_hash)
        })?;

        let (rebuilt, diff) =
            build_genesis_block(ctx.differ.as_ref(), tx, first.block_time).await?;
        matches_submitted(mined, &first, &rebuilt, &diff)?;
        (rebuilt, tx.payload.clone())
    } else {
        let prior = ctx
            .store
            .most_recent_state_block(&image_hash, &mined.previous_block)
            .await?
            .ok_or_else(|| {
                Failure::Invalid(Rejection {
                    step: Step::Replay,
                    reason: format!("image {} has no genesis block", image_hash),
                })
            })?;
        ensure(
            first.prev_block_hash == prior.block_hash,
            Step::Replay,
            || {
                format!(
                    "statechain block {} of image {} does not extend the latest committed block",
                    first.block_number, image_hash
                )
            },
        )?;
        let state = state_at(&ctx.store, ctx.differ.as_ref(), &prior, &ctx.cancel).await?;
        ensure(hash(&state) == prior.state_current_hash, Step::Replay, || {
            format!(
                "reconstructed state of image {} does not match block {}",
                image_hash, prior.block_number
            )
        })?;
        let next = replay_block(ctx, mined, &prior, &state, &first).await?;
        (first, next)
    };

    for block in blocks {
        ctx.check_cancelled()?;
        ensure(block.prev_block_hash == prev.block_hash, Step::Replay, || {
            format!(
                "statechain block {} of image {} does not link to block {}",
                block.block_number, image_hash, prev.block_number
            )
        })?;
        state = replay_block(ctx, mined, &prev, &state, &block).await?;
        prev = block;
    }

    debug!(image = %image_hash, block_number = prev.block_number, "replayed statechain");
    Ok(())
}

/// Re-executes the transaction behind `block` on top of `state`, returning the new state.
async fn replay_block(
    ctx: &EngineContext,
    mined: &MinedBlock,
    prev: &StatechainBlock,
    state: &[u8],
    block: &StatechainBlock,
) -> Result<Vec<u8>, Failure> {
    let tx = submitted_tx(mined, block)?;
    ensure(tx.image_hash == block.image_hash, Step::Replay, || {
        format!("transaction {} targets another image", block.tx_hash)
    })?;
    ensure(tx.method != Method::Deploy, Step::Replay, || {
        format!("deploy {} does not start a new statechain", block.tx_hash)
    })?;
    tx.verify(ctx.signer.as_ref())?;

    let (rebuilt, diff, next_state) =
        build_next_block(ctx, prev, state, tx, block.block_time).await?;
    matches_submitted(mined, block, &rebuilt, &diff)?;
    Ok(next_state)
}
