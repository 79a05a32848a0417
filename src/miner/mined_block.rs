use crate::blockchain::{Diff, Entity, MainchainBlock, MerkleTree, StatechainBlock};
use crate::error::{ChainError, Result};
use crate::hashing::Hash;
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A candidate mainchain block together with every entity it newly commits.
///
/// Maps are keyed by entity hash. While mining, one `MinedBlock` sits behind a mutex
/// and per-application workers add to it; once finalized it is treated as read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinedBlock {
    pub next_block: MainchainBlock,
    pub previous_block: MainchainBlock,
    pub statechain_blocks: BTreeMap<Hash, StatechainBlock>,
    pub transactions: BTreeMap<Hash, Transaction>,
    pub diffs: BTreeMap<Hash, Diff>,
    pub merkle_trees: BTreeMap<Hash, MerkleTree>,
}

impl MinedBlock {
    pub fn new(next_block: MainchainBlock, previous_block: MainchainBlock) -> Self {
        MinedBlock {
            next_block,
            previous_block,
            statechain_blocks: BTreeMap::new(),
            transactions: BTreeMap::new(),
            diffs: BTreeMap::new(),
            merkle_trees: BTreeMap::new(),
        }
    }

    /// Records one application's output for this round.
    pub fn record(
        &mut self,
        blocks: Vec<StatechainBlock>,
        transactions: Vec<Transaction>,
        diffs: Vec<Diff>,
    ) -> Result<()> {
        for block in blocks {
            self.statechain_blocks.insert(block.require_hash()?, block);
        }
        for tx in transactions {
            self.transactions.insert(tx.require_hash()?, tx);
        }
        for diff in diffs {
            self.diffs.insert(diff.require_hash()?, diff);
        }
        Ok(())
    }

    pub fn insert_merkle_tree(&mut self, tree: MerkleTree) {
        self.merkle_trees.insert(tree.root(), tree);
    }

    /// The tree the next block commits to, if it was submitted.
    pub fn statechain_tree(&self) -> Option<&MerkleTree> {
        self.merkle_trees
            .get(&self.next_block.state_blocks_merkle_hash)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| ChainError::MalformedEntity(format!("mined block: {}", e)))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| ChainError::MalformedEntity(format!("mined block: {}", e)))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| ChainError::MalformedEntity(format!("mined block: {}", e)))
    }
}
