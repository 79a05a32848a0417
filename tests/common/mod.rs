//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use imagechain::config::MinerConfig;
use imagechain::crypto::{KeyPair, Secp256k1Signer};
use imagechain::miner::RemoveTx;
use imagechain::persistence::BlockStore;
use imagechain::sandbox::Sandbox;
use imagechain::{
    hash, ChainError, EngineContext, Entity, Hash, MainchainBlock, MerkleKind, MerkleTree,
    Method, MinedBlock, Miner, Result, Transaction,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// Appends each payload as a new line of the state. A payload of `trap` fails.
pub struct LineSandbox;

#[async_trait]
impl Sandbox for LineSandbox {
    async fn apply(&self, image_hash: &Hash, payload: &[u8], prior: &[u8]) -> Result<Vec<u8>> {
        if payload == b"trap" {
            return Err(ChainError::ExecutionError(format!(
                "image {} trapped",
                image_hash
            )));
        }
        let mut next = prior.to_vec();
        if !next.is_empty() && !next.ends_with(b"\n") {
            next.push(b'\n');
        }
        next.extend_from_slice(payload);
        next.push(b'\n');
        Ok(next)
    }
}

pub fn context(store: BlockStore) -> EngineContext {
    EngineContext::with_defaults(store, Arc::new(LineSandbox))
}

pub struct Harness {
    pub miner_key: KeyPair,
    pub user: KeyPair,
    pub removed: Arc<Mutex<Vec<Hash>>>,
}

impl Harness {
    pub fn new() -> Self {
        Harness {
            miner_key: KeyPair::generate(),
            user: KeyPair::generate(),
            removed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn config(&self, concurrent: bool) -> MinerConfig {
        MinerConfig {
            difficulty: 1,
            concurrent,
            miner_address: self.miner_key.address(),
            ..MinerConfig::default()
        }
    }

    pub fn miner(&self, ctx: &EngineContext, concurrent: bool) -> Miner {
        let removed = Arc::clone(&self.removed);
        let remove_tx: RemoveTx = Arc::new(move |h: &Hash| removed.lock().push(*h));
        Miner::new(ctx.clone(), self.config(concurrent))
            .with_signing_key(self.miner_key.secret_bytes().to_vec())
            .with_remove_tx(remove_tx)
    }

    pub fn tx(&self, image: &str, method: Method, payload: &str) -> Transaction {
        let mut tx = Transaction::new(
            image_hash(image),
            method,
            payload.as_bytes().to_vec(),
            self.user.address(),
        );
        tx.sign(&Secp256k1Signer, &self.user.secret_bytes())
            .expect("signing with a generated key");
        tx
    }

    pub fn deploy(&self, image: &str, payload: &str) -> Transaction {
        self.tx(image, Method::Deploy, payload)
    }

    pub fn invoke(&self, image: &str, payload: &str) -> Transaction {
        self.tx(image, Method::InvokeMethod, payload)
    }

    /// Empty candidate on top of `prev`, for assembling blocks by hand.
    pub fn forge(&self, prev: &MainchainBlock) -> Result<MinedBlock> {
        let next = MainchainBlock::next(prev, 0, &self.miner_key.address())?;
        Ok(MinedBlock::new(next, prev.clone()))
    }

    /// Recommits the statechain blocks, rehashes at difficulty 0 and signs with the
    /// miner key, so only the statechain content is left to judge.
    pub fn reseal(&self, mined: &mut MinedBlock) -> Result<()> {
        let hashes = MerkleTree::canonical_order(mined.statechain_blocks.keys().copied());
        let tree = MerkleTree::build_from_hashes(hashes, MerkleKind::StatechainBlocks);
        mined.merkle_trees.clear();
        mined.next_block.state_blocks_merkle_hash = tree.root();
        mined.insert_merkle_tree(tree);
        mined.next_block.difficulty = 0;
        mined.next_block.set_hash();
        mined
            .next_block
            .sign(&Secp256k1Signer, &self.miner_key.secret_bytes())
    }
}

pub fn image_hash(name: &str) -> Hash {
    hash(name.as_bytes())
}
