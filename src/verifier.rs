//! # Block Verification
//!
//! Re-derives every commitment in a received [`MinedBlock`] and compares:
//!
//! ```text
//! 1. Structure  - hashes present, linkage to the previous block, mainchain marker, signature present
//! 2. PoW        - leading zero digits
//! 3. Hash       - recomputed block hash
//! 4. Signature  - miner signature over the hash bytes
//! 5. Sequence   - block number follows the previous block
//! 6. Merkle     - committed tree matches the submitted statechain blocks
//! 7. Replay     - per image, rebuild every statechain block from its transaction
//! ```
//!
//! A mismatch is a [`Verdict::Invalid`]. Failures of the store, sandbox, or diff engine
//! are returned as errors so the caller can retry instead of rejecting the block.

mod replay;

use crate::blockchain::{Entity, MerkleTree};
use crate::context::EngineContext;
use crate::error::{ChainError, Result};
use crate::hashing::{Hash, MAINCHAIN_IMAGE_HASH};
use crate::miner::pow::meets_difficulty;
use crate::miner::MinedBlock;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Structure,
    ProofOfWork,
    HashIntegrity,
    Signature,
    Sequence,
    Merkle,
    Replay,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Step::Structure => "structure",
            Step::ProofOfWork => "proof-of-work",
            Step::HashIntegrity => "hash-integrity",
            Step::Signature => "signature",
            Step::Sequence => "sequence",
            Step::Merkle => "merkle",
            Step::Replay => "replay",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub step: Step,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    Invalid(Rejection),
}

impl Verdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, Verdict::Valid)
    }

    /// The step that rejected the block, if any.
    pub fn failed_step(&self) -> Option<Step> {
        match self {
            Verdict::Valid => None,
            Verdict::Invalid(r) => Some(r.step),
        }
    }
}

/// Why a check stopped: the block is bad, or something underneath failed.
#[derive(Debug)]
pub(crate) enum Failure {
    Invalid(Rejection),
    Error(ChainError),
}

impl From<ChainError> for Failure {
    /// Integrity errors raised while replaying are block defects; everything else is
    /// a collaborator problem.
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::InvalidTransaction(reason)
            | ChainError::InvalidBlock(reason)
            | ChainError::BrokenChain(reason) => Failure::Invalid(Rejection {
                step: Step::Replay,
                reason,
            }),
            other => Failure::Error(other),
        }
    }
}

pub(crate) type Checked = std::result::Result<(), Failure>;

pub(crate) fn ensure(condition: bool, step: Step, reason: impl FnOnce() -> String) -> Checked {
    if condition {
        Ok(())
    } else {
        Err(Failure::Invalid(Rejection {
            step,
            reason: reason(),
        }))
    }
}

pub struct Verifier {
    ctx: EngineContext,
    concurrent: bool,
}

impl Verifier {
    pub fn new(ctx: EngineContext) -> Self {
        Verifier {
            ctx,
            concurrent: true,
        }
    }

    /// Replay images one after another instead of in parallel tasks.
    pub fn sequential(mut self) -> Self {
        self.concurrent = false;
        self
    }

    pub async fn verify(&self, mined: &MinedBlock) -> Result<bool> {
        Ok(self.verdict(mined).await?.is_valid())
    }

    pub async fn verdict(&self, mined: &MinedBlock) -> Result<Verdict> {
        let outcome = match self.check_header(mined) {
            Ok(()) => self.check_statechain(mined).await,
            Err(f) => Err(f),
        };
        match outcome {
            Ok(()) => {
                info!(block_number = mined.next_block.block_number, "block verified");
                Ok(Verdict::Valid)
            }
            Err(Failure::Invalid(rejection)) => {
                warn!(
                    block_number = mined.next_block.block_number,
                    step = %rejection.step,
                    reason = %rejection.reason,
                    "block rejected"
                );
                Ok(Verdict::Invalid(rejection))
            }
            Err(Failure::Error(e)) => Err(e),
        }
    }

    /// Steps 1 to 5.
    fn check_header(&self, mined: &MinedBlock) -> Checked {
        let next = &mined.next_block;
        let previous = &mined.previous_block;

        let block_hash = next.block_hash.ok_or_else(|| {
            Failure::Invalid(Rejection {
                step: Step::Structure,
                reason: "next block has no hash".to_string(),
            })
        })?;
        ensure(previous.block_hash.is_some(), Step::Structure, || {
            "previous block has no hash".to_string()
        })?;
        ensure(previous.block_hash == next.prev_block_hash, Step::Structure, || {
            "next block does not link to the previous block".to_string()
        })?;
        ensure(next.image_hash == *MAINCHAIN_IMAGE_HASH, Step::Structure, || {
            format!("image hash {} is not the mainchain marker", next.image_hash)
        })?;
        let sig = next.miner_sig.as_ref().ok_or_else(|| {
            Failure::Invalid(Rejection {
                step: Step::Structure,
                reason: "next block is not signed".to_string(),
            })
        })?;

        ensure(
            meets_difficulty(&block_hash, next.difficulty),
            Step::ProofOfWork,
            || format!("hash {} does not meet difficulty {}", block_hash, next.difficulty),
        )?;

        ensure(next.calculate_hash() == block_hash, Step::HashIntegrity, || {
            format!("hash {} does not match block contents", block_hash)
        })?;

        let signer = self.ctx.signer.as_ref();
        let signed = signer
            .decode_address(&next.miner_address)
            .and_then(|key| signer.verify(&key, block_hash.as_bytes(), sig));
        ensure(matches!(signed, Ok(true)), Step::Signature, || match &signed {
            Err(e) => format!("cannot check miner signature: {}", e),
            _ => format!("miner signature does not verify against {}", next.miner_address),
        })?;

        ensure(
            previous.block_number.checked_add(1) == Some(next.block_number),
            Step::Sequence,
            || {
                format!(
                    "block number {} does not follow {}",
                    next.block_number, previous.block_number
                )
            },
        )?;

        debug!(block_number = next.block_number, "header checks passed");
        Ok(())
    }

    /// Steps 6 and 7.
    async fn check_statechain(&self, mined: &MinedBlock) -> Checked {
        for (key, block) in &mined.statechain_blocks {
            ensure(block.hash() == Some(*key), Step::Merkle, || {
                format!("statechain block stored under {} has another hash", key)
            })?;
            ensure(block.has_valid_hash(), Step::Merkle, || {
                format!("statechain block {} does not match its contents", key)
            })?;
        }

        let committed = mined.next_block.state_blocks_merkle_hash;
        let tree = mined.statechain_tree().ok_or_else(|| {
            Failure::Invalid(Rejection {
                step: Step::Merkle,
                reason: format!("merkle tree {} not submitted", committed),
            })
        })?;
        let expected = MerkleTree::canonical_order(mined.statechain_blocks.keys().copied());
        ensure(tree.len() == mined.statechain_blocks.len(), Step::Merkle, || {
            format!(
                "merkle tree has {} hashes for {} statechain blocks",
                tree.len(),
                mined.statechain_blocks.len()
            )
        })?;
        ensure(tree.hashes == expected, Step::Merkle, || {
            "merkle tree hashes differ from the submitted statechain blocks".to_string()
        })?;
        ensure(
            MerkleTree::build_from_hashes(expected, tree.kind).root() == committed,
            Step::Merkle,
            || format!("rebuilt merkle root does not match {}", committed),
        )?;
        let mut referenced = BTreeSet::new();
        for block in mined.statechain_blocks.values() {
            ensure(referenced.insert(block.tx_hash), Step::Merkle, || {
                format!("transaction {} backs more than one statechain block", block.tx_hash)
            })?;
        }
        ensure(
            referenced.iter().eq(mined.transactions.keys()),
            Step::Merkle,
            || {
                format!(
                    "{} transactions submitted for {} referenced by statechain blocks",
                    mined.transactions.len(),
                    referenced.len()
                )
            },
        )?;

        let mut groups: BTreeMap<Hash, Vec<_>> = BTreeMap::new();
        for block in mined.statechain_blocks.values() {
            groups.entry(block.image_hash).or_default().push(block.clone());
        }
        for blocks in groups.values_mut() {
            blocks.sort_by_key(|b| b.block_number);
        }

        if !self.concurrent {
            for (image_hash, blocks) in groups {
                replay::replay_image(&self.ctx, mined, image_hash, blocks).await?;
            }
            return Ok(());
        }

        let ctx = self.ctx.child();
        let shared = Arc::new(mined.clone());
        let mut tasks = JoinSet::new();
        for (image_hash, blocks) in groups {
            let ctx = ctx.clone();
            let shared = Arc::clone(&shared);
            tasks.spawn(async move { replay::replay_image(&ctx, &shared, image_hash, blocks).await });
        }

        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => Err(Failure::Error(ChainError::InvalidBlock(format!(
                    "replay task failed: {}",
                    e
                )))),
            };
            if let Err(failure) = outcome {
                ctx.cancel.cancel();
                tasks.abort_all();
                return Err(failure);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MinerConfig;
    use crate::crypto::{KeyPair, Secp256k1Signer};
    use crate::miner::Miner;
    use crate::persistence::BlockStore;
    use crate::sandbox::Sandbox;
    use crate::transaction::{Method, Transaction};
    use async_trait::async_trait;

    struct Append;

    #[async_trait]
    impl Sandbox for Append {
        async fn apply(&self, _: &Hash, payload: &[u8], prior: &[u8]) -> Result<Vec<u8>> {
            let mut next = prior.to_vec();
            next.extend_from_slice(payload);
            next.push(b'\n');
            Ok(next)
        }
    }

    fn context() -> EngineContext {
        EngineContext::with_defaults(BlockStore::in_memory(), Arc::new(Append))
    }

    fn signed(keypair: &KeyPair, method: Method, payload: &[u8]) -> Transaction {
        let mut tx = Transaction::new(
            crate::hashing::hash(b"counter"),
            method,
            payload.to_vec(),
            keypair.address(),
        );
        tx.sign(&Secp256k1Signer, &keypair.secret_bytes()).unwrap();
        tx
    }

    async fn mine_deploy(ctx: &EngineContext) -> (MinedBlock, KeyPair) {
        let miner_key = KeyPair::generate();
        let config = MinerConfig {
            difficulty: 1,
            concurrent: false,
            miner_address: miner_key.address(),
            ..MinerConfig::default()
        };
        let user = KeyPair::generate();
        let txs = vec![
            signed(&user, Method::Deploy, b"count=0"),
            signed(&user, Method::InvokeMethod, b"inc"),
        ];
        let mined = Miner::new(ctx.clone(), config)
            .with_signing_key(miner_key.secret_bytes().to_vec())
            .mine(&crate::blockchain::MainchainBlock::genesis(), txs)
            .await
            .unwrap();
        (mined, miner_key)
    }

    /// Rehashes an edited header at difficulty 0 and signs it again.
    fn reseal(mined: &mut MinedBlock, key: &KeyPair) {
        mined.next_block.difficulty = 0;
        mined.next_block.set_hash();
        mined
            .next_block
            .sign(&Secp256k1Signer, &key.secret_bytes())
            .unwrap();
    }

    #[tokio::test]
    async fn test_mined_block_verifies() {
        let ctx = context();
        let (mined, _) = mine_deploy(&ctx).await;
        assert_eq!(mined.statechain_blocks.len(), 2);
        assert_eq!(Verifier::new(ctx.clone()).verdict(&mined).await.unwrap(), Verdict::Valid);
        assert!(Verifier::new(ctx).sequential().verify(&mined).await.unwrap());
    }

    #[tokio::test]
    async fn test_unsigned_block_fails_structure() {
        let ctx = context();
        let (mut mined, _) = mine_deploy(&ctx).await;
        mined.next_block.miner_sig = None;
        let verdict = Verifier::new(ctx).verdict(&mined).await.unwrap();
        assert_eq!(verdict.failed_step(), Some(Step::Structure));
    }

    #[tokio::test]
    async fn test_edited_header_fails_hash_integrity() {
        let ctx = context();
        let (mut mined, _) = mine_deploy(&ctx).await;
        mined.next_block.block_number = 7;
        let verdict = Verifier::new(ctx).verdict(&mined).await.unwrap();
        assert_eq!(verdict.failed_step(), Some(Step::HashIntegrity));
    }

    #[tokio::test]
    async fn test_tampered_state_block_fails_merkle() {
        let ctx = context();
        let (mut mined, _) = mine_deploy(&ctx).await;
        let key = *mined.statechain_blocks.keys().next().unwrap();
        if let Some(block) = mined.statechain_blocks.get_mut(&key) {
            block.state_current_hash = crate::hashing::hash(b"forged");
        }
        let verdict = Verifier::new(ctx).verdict(&mined).await.unwrap();
        assert_eq!(verdict.failed_step(), Some(Step::Merkle));
    }

    #[tokio::test]
    async fn test_missing_transaction_fails_merkle() {
        let ctx = context();
        let (mut mined, _) = mine_deploy(&ctx).await;
        let key = *mined.transactions.keys().next().unwrap();
        mined.transactions.remove(&key);
        let verdict = Verifier::new(ctx).verdict(&mined).await.unwrap();
        assert_eq!(verdict.failed_step(), Some(Step::Merkle));
    }

    #[tokio::test]
    async fn test_hash_above_difficulty_fails_proof_of_work() {
        let ctx = context();
        let (mut mined, key) = mine_deploy(&ctx).await;
        mined.next_block.difficulty = 63;
        mined.next_block.set_hash();
        mined
            .next_block
            .sign(&Secp256k1Signer, &key.secret_bytes())
            .unwrap();
        let verdict = Verifier::new(ctx).verdict(&mined).await.unwrap();
        assert_eq!(verdict.failed_step(), Some(Step::ProofOfWork));
    }

    #[tokio::test]
    async fn test_foreign_signature_fails_signature() {
        let ctx = context();
        let (mut mined, _) = mine_deploy(&ctx).await;
        let intruder = KeyPair::generate();
        mined
            .next_block
            .sign(&Secp256k1Signer, &intruder.secret_bytes())
            .unwrap();
        let verdict = Verifier::new(ctx).verdict(&mined).await.unwrap();
        assert_eq!(verdict.failed_step(), Some(Step::Signature));
    }

    #[tokio::test]
    async fn test_swapped_miner_address_fails_signature() {
        let ctx = context();
        let (mut mined, key) = mine_deploy(&ctx).await;
        let intruder = KeyPair::generate();
        mined.next_block.miner_address = intruder.address();
        reseal(&mut mined, &key);
        let verdict = Verifier::new(ctx).verdict(&mined).await.unwrap();
        assert_eq!(verdict.failed_step(), Some(Step::Signature));
    }

    #[tokio::test]
    async fn test_skipped_block_number_fails_sequence() {
        let ctx = context();
        let (mut mined, key) = mine_deploy(&ctx).await;
        mined.next_block.block_number = 3;
        reseal(&mut mined, &key);
        let verdict = Verifier::new(ctx).verdict(&mined).await.unwrap();
        assert_eq!(verdict.failed_step(), Some(Step::Sequence));
    }

    #[tokio::test]
    async fn test_exhausted_previous_block_number_fails_sequence() {
        let ctx = context();
        let (mut mined, key) = mine_deploy(&ctx).await;
        mined.previous_block.block_number = u64::MAX;
        mined.next_block.block_number = u64::MAX;
        reseal(&mut mined, &key);
        let verdict = Verifier::new(ctx.clone()).verdict(&mined).await.unwrap();
        assert_eq!(verdict.failed_step(), Some(Step::Sequence));

        mined.next_block.block_number = 0;
        reseal(&mut mined, &key);
        let verdict = Verifier::new(ctx).verdict(&mined).await.unwrap();
        assert_eq!(verdict.failed_step(), Some(Step::Sequence));
    }

    #[test]
    fn test_failure_classification() {
        assert!(matches!(
            Failure::from(ChainError::BrokenChain("gone".into())),
            Failure::Invalid(Rejection { step: Step::Replay, .. })
        ));
        assert!(matches!(
            Failure::from(ChainError::StoreError("down".into())),
            Failure::Error(ChainError::StoreError(_))
        ));
        assert!(matches!(
            Failure::from(ChainError::ExecutionError("trap".into())),
            Failure::Error(_)
        ));
    }
}
