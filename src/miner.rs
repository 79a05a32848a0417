//! # Block Mining
//!
//! Turns pending application transactions into a candidate mainchain block.
//!
//! ```text
//! Gathering      - bootstrap the next block, drop invalid txs, group by image
//! BuildingStates - one task per image: replay state, run txs, record blocks/diffs
//! Committing     - merkle tree over the canonical order of new statechain blocks
//! SearchingPoW   - random nonces until the hash meets the difficulty
//! Finalized      - hash set, block signed when a key is configured
//! ```
//!
//! An image whose build fails is logged and left out of the block; the attempt goes
//! on without it. Cancellation at any stage moves the attempt to `Aborted` and
//! returns [`ChainError::Cancelled`]; a partial block is never returned.

pub mod mined_block;
pub mod pow;
pub mod states;

pub use mined_block::MinedBlock;
pub use states::RemoveTx;

use crate::blockchain::{Entity, MainchainBlock, MerkleKind, MerkleTree};
use crate::config::MinerConfig;
use crate::context::EngineContext;
use crate::error::{ChainError, Result};
use crate::hashing::Hash;
use crate::transaction::Transaction;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiningState {
    Idle,
    Gathering,
    BuildingStates,
    Committing,
    SearchingPoW,
    Finalized,
    Aborted,
}

impl fmt::Display for MiningState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            MiningState::Idle => "idle",
            MiningState::Gathering => "gathering",
            MiningState::BuildingStates => "building-states",
            MiningState::Committing => "committing",
            MiningState::SearchingPoW => "searching-pow",
            MiningState::Finalized => "finalized",
            MiningState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

pub struct Miner {
    ctx: EngineContext,
    config: MinerConfig,
    signing_key: Option<Vec<u8>>,
    remove_tx: Option<RemoveTx>,
    state: Mutex<MiningState>,
}

impl Miner {
    pub fn new(ctx: EngineContext, config: MinerConfig) -> Self {
        Miner {
            ctx,
            config,
            signing_key: None,
            remove_tx: None,
            state: Mutex::new(MiningState::Idle),
        }
    }

    /// Secret key used to sign finalized blocks.
    pub fn with_signing_key(mut self, secret_key: impl Into<Vec<u8>>) -> Self {
        self.signing_key = Some(secret_key.into());
        self
    }

    /// Callback told about transactions that are permanently invalid.
    pub fn with_remove_tx(mut self, remove_tx: RemoveTx) -> Self {
        self.remove_tx = Some(remove_tx);
        self
    }

    pub fn state(&self) -> MiningState {
        *self.state.lock()
    }

    fn advance(&self, next: MiningState) {
        let mut state = self.state.lock();
        let prev = *state;
        debug!(from = %prev, to = %next, "mining state");
        *state = next;
    }

    /// Runs one mining attempt on top of `previous_block`.
    pub async fn mine(
        &self,
        previous_block: &MainchainBlock,
        pending: Vec<Transaction>,
    ) -> Result<MinedBlock> {
        match self.attempt(previous_block, pending).await {
            Ok(mined) => {
                self.advance(MiningState::Finalized);
                info!(
                    block_number = mined.next_block.block_number,
                    hash = ?mined.next_block.block_hash,
                    statechain_blocks = mined.statechain_blocks.len(),
                    "mined block"
                );
                Ok(mined)
            }
            Err(e) => {
                self.advance(MiningState::Aborted);
                warn!(error = %e, "mining attempt aborted");
                Err(e)
            }
        }
    }

    async fn attempt(
        &self,
        previous_block: &MainchainBlock,
        pending: Vec<Transaction>,
    ) -> Result<MinedBlock> {
        self.advance(MiningState::Gathering);
        if previous_block.block_hash.is_none() {
            return Err(ChainError::IncompleteBlock(
                "previous block has no hash".to_string(),
            ));
        }
        let next_block = MainchainBlock::next(
            previous_block,
            self.config.difficulty,
            &self.config.miner_address,
        )?;
        let block_time = next_block.block_time;
        let groups = self.gather(pending);

        self.advance(MiningState::BuildingStates);
        let staged = Arc::new(Mutex::new(MinedBlock::new(
            next_block,
            previous_block.clone(),
        )));
        self.build_states(groups, previous_block, block_time, &staged)
            .await?;
        self.ctx.check_cancelled()?;

        self.advance(MiningState::Committing);
        let mut mined = Arc::try_unwrap(staged)
            .map(|block| block.into_inner())
            .map_err(|_| {
                ChainError::IncompleteBlock("state builders still hold the block".to_string())
            })?;
        let hashes = MerkleTree::canonical_order(mined.statechain_blocks.keys().copied());
        let tree = MerkleTree::build_from_hashes(hashes, MerkleKind::StatechainBlocks);
        mined.next_block.state_blocks_merkle_hash = tree.root();
        debug!(root = %tree.root(), leaves = tree.len(), "committed statechain blocks");
        mined.insert_merkle_tree(tree);

        self.advance(MiningState::SearchingPoW);
        let candidate = mined.next_block.clone();
        let cancel = self.ctx.cancel.clone();
        mined.next_block = if self.config.simulated {
            pow::simulate(
                candidate,
                Duration::from_millis(self.config.simulated_delay_ms),
                &cancel,
            )
            .await?
        } else {
            tokio::task::spawn_blocking(move || pow::search(candidate, &cancel))
                .await
                .map_err(|e| ChainError::IncompleteBlock(format!("search task failed: {}", e)))??
        };

        if mined.next_block.block_hash.is_none() {
            return Err(ChainError::IncompleteBlock(
                "proof-of-work ended without a hash".to_string(),
            ));
        }
        if let Some(key) = &self.signing_key {
            mined.next_block.sign(self.ctx.signer.as_ref(), key)?;
        }
        Ok(mined)
    }

    /// Drops transactions that fail verification and repeats of an earlier one, and
    /// groups the rest by image, keeping scan order within each group.
    fn gather(&self, pending: Vec<Transaction>) -> BTreeMap<Hash, Vec<Transaction>> {
        let mut groups: BTreeMap<Hash, Vec<Transaction>> = BTreeMap::new();
        let mut seen = BTreeSet::new();
        for tx in pending {
            let verified = tx
                .verify(self.ctx.signer.as_ref())
                .and_then(|()| tx.require_hash());
            let tx_hash = match verified {
                Ok(tx_hash) => tx_hash,
                Err(e) => {
                    warn!(tx = ?tx.tx_hash, error = %e, "dropping invalid transaction");
                    if let (Some(remove), Some(hash)) = (&self.remove_tx, tx.tx_hash) {
                        remove(&hash);
                    }
                    continue;
                }
            };
            if !seen.insert(tx_hash) {
                debug!(tx = %tx_hash, "skipping repeated transaction");
                continue;
            }
            groups.entry(tx.image_hash).or_default().push(tx);
        }
        debug!(images = groups.len(), "grouped pending transactions");
        groups
    }

    async fn build_states(
        &self,
        groups: BTreeMap<Hash, Vec<Transaction>>,
        head: &MainchainBlock,
        block_time: u64,
        staged: &Arc<Mutex<MinedBlock>>,
    ) -> Result<()> {
        if !self.config.concurrent {
            for (image_hash, txs) in groups {
                let outcome = states::build_app(
                    &self.ctx,
                    image_hash,
                    txs,
                    head,
                    block_time,
                    self.remove_tx.as_ref(),
                )
                .await;
                stage(staged, image_hash, outcome)?;
            }
            return Ok(());
        }

        let ctx = self.ctx.child();
        let mut tasks = JoinSet::new();
        for (image_hash, txs) in groups {
            let ctx = ctx.clone();
            let head = head.clone();
            let staged = Arc::clone(staged);
            let remove_tx = self.remove_tx.clone();
            tasks.spawn(async move {
                let outcome =
                    states::build_app(&ctx, image_hash, txs, &head, block_time, remove_tx.as_ref())
                        .await;
                stage(&staged, image_hash, outcome)
            });
        }

        loop {
            let joined = tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    tasks.abort_all();
                    return Err(ChainError::Cancelled);
                }
                joined = tasks.join_next() => joined,
            };
            match joined {
                None => return Ok(()),
                Some(Ok(Ok(()))) => {}
                Some(Ok(Err(e))) => {
                    ctx.cancel.cancel();
                    tasks.abort_all();
                    return Err(e);
                }
                Some(Err(e)) if e.is_cancelled() => {}
                Some(Err(e)) => warn!(error = %e, "state builder task panicked"),
            }
        }
    }
}

/// Moves a finished image build into the shared block. Build failures are logged and
/// skipped; only cancellation propagates.
fn stage(
    staged: &Mutex<MinedBlock>,
    image_hash: Hash,
    outcome: Result<states::AppBuild>,
) -> Result<()> {
    match outcome {
        Ok(build) => staged
            .lock()
            .record(build.blocks, build.transactions, build.diffs),
        Err(ChainError::Cancelled) => Err(ChainError::Cancelled),
        Err(e) => {
            warn!(image = %image_hash, error = %e, "excluding image from block");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::persistence::BlockStore;
    use crate::sandbox::Sandbox;
    use crate::transaction::Method;
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl Sandbox for Echo {
        async fn apply(&self, _: &Hash, payload: &[u8], prior: &[u8]) -> Result<Vec<u8>> {
            let mut next = prior.to_vec();
            next.extend_from_slice(payload);
            next.push(b'\n');
            Ok(next)
        }
    }

    fn miner(concurrent: bool) -> Miner {
        let ctx = EngineContext::with_defaults(BlockStore::in_memory(), Arc::new(Echo));
        let config = MinerConfig {
            difficulty: 1,
            concurrent,
            miner_address: "0xminer".to_string(),
            ..MinerConfig::default()
        };
        Miner::new(ctx, config)
    }

    fn deploy(keypair: &KeyPair, image: &[u8]) -> Transaction {
        let mut tx = Transaction::new(
            crate::hashing::hash(image),
            Method::Deploy,
            b"genesis\n".to_vec(),
            keypair.address(),
        );
        tx.sign(&crate::crypto::Secp256k1Signer, &keypair.secret_bytes())
            .unwrap();
        tx
    }

    #[tokio::test]
    async fn test_state_transitions_to_finalized() {
        let miner = miner(false);
        assert_eq!(miner.state(), MiningState::Idle);
        let keypair = KeyPair::generate();
        let mined = miner
            .mine(&MainchainBlock::genesis(), vec![deploy(&keypair, b"app")])
            .await
            .unwrap();
        assert_eq!(miner.state(), MiningState::Finalized);
        assert_eq!(mined.statechain_blocks.len(), 1);
        assert!(pow::meets_difficulty(&mined.next_block.block_hash.unwrap(), 1));
    }

    #[tokio::test]
    async fn test_unsigned_transactions_are_dropped() {
        let miner = miner(true);
        let keypair = KeyPair::generate();
        let mut unsigned = deploy(&keypair, b"app");
        unsigned.sig = None;
        let mined = miner
            .mine(&MainchainBlock::genesis(), vec![unsigned])
            .await
            .unwrap();
        assert!(mined.statechain_blocks.is_empty());
        assert_eq!(
            mined.next_block.state_blocks_merkle_hash,
            crate::blockchain::merkle_root(&[])
        );
    }

    #[tokio::test]
    async fn test_previous_block_without_hash_aborts() {
        let miner = miner(false);
        let mut head = MainchainBlock::genesis();
        head.block_hash = None;
        let err = miner.mine(&head, Vec::new()).await.unwrap_err();
        assert!(matches!(err, ChainError::IncompleteBlock(_)));
        assert_eq!(miner.state(), MiningState::Aborted);
    }
}
