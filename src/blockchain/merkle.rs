//! Binary merkle trees over entity hashes.
//!
//! Leaves are the committed hashes themselves. Each level pairs adjacent nodes and
//! hashes `left || right`; an odd trailing node is paired with itself. The root is
//! order-sensitive, so callers that need agreement must order leaves with
//! [`MerkleTree::canonical_order`] first. An empty tree's root is the hash of the
//! empty byte string.

use crate::blockchain::Entity;
use crate::error::ChainError;
use crate::hashing::{hash, Hash};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// The entity type a tree commits to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MerkleKind {
    StatechainBlocks,
    MainchainBlocks,
    Transactions,
    Diffs,
    MerkleTrees,
}

impl MerkleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MerkleKind::StatechainBlocks => "statechain-blocks",
            MerkleKind::MainchainBlocks => "mainchain-blocks",
            MerkleKind::Transactions => "transactions",
            MerkleKind::Diffs => "diffs",
            MerkleKind::MerkleTrees => "merkle-trees",
        }
    }
}

impl fmt::Display for MerkleKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MerkleKind {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self, ChainError> {
        match s {
            "statechain-blocks" => Ok(MerkleKind::StatechainBlocks),
            "mainchain-blocks" => Ok(MerkleKind::MainchainBlocks),
            "transactions" => Ok(MerkleKind::Transactions),
            "diffs" => Ok(MerkleKind::Diffs),
            "merkle-trees" => Ok(MerkleKind::MerkleTrees),
            other => Err(ChainError::UnknownKind(other.to_string())),
        }
    }
}

/// Root of the binary merkle tree over `leaves`, in the order given.
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return hash(&[]);
    }

    let mut level: Vec<Hash> = leaves.to_vec();
    loop {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let left = &pair[0];
            let right = pair.get(1).unwrap_or(left);
            let mut hasher = Sha256::new();
            hasher.update(left.as_bytes());
            hasher.update(right.as_bytes());
            next.push(Hash::from_bytes(hasher.finalize().into()));
        }
        if next.len() == 1 {
            return next[0];
        }
        level = next;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleTree {
    pub root_hash: Option<Hash>,
    pub kind: MerkleKind,
    pub hashes: Vec<Hash>,
}

impl MerkleTree {
    pub fn build_from_hashes(hashes: Vec<Hash>, kind: MerkleKind) -> Self {
        let root = merkle_root(&hashes);
        MerkleTree {
            root_hash: Some(root),
            kind,
            hashes,
        }
    }

    /// Sorted ascending, duplicates removed.
    pub fn canonical_order(hashes: impl IntoIterator<Item = Hash>) -> Vec<Hash> {
        let mut ordered: Vec<Hash> = hashes.into_iter().collect();
        ordered.sort_unstable();
        ordered.dedup();
        ordered
    }

    /// Cached root, or the root rebuilt from `hashes` when none is cached.
    pub fn root(&self) -> Hash {
        self.root_hash.unwrap_or_else(|| merkle_root(&self.hashes))
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

impl Entity for MerkleTree {
    const NAME: &'static str = "merkle tree";

    fn calculate_hash(&self) -> Hash {
        merkle_root(&self.hashes)
    }

    fn hash(&self) -> Option<Hash> {
        self.root_hash
    }

    fn set_hash(&mut self) {
        self.root_hash = Some(self.calculate_hash());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(n: usize) -> Vec<Hash> {
        (0..n).map(|i| hash(format!("leaf-{}", i).as_bytes())).collect()
    }

    #[test]
    fn test_empty_tree_root() {
        let tree = MerkleTree::build_from_hashes(Vec::new(), MerkleKind::StatechainBlocks);
        assert_eq!(tree.root(), hash(&[]));
        assert!(tree.is_empty());
    }

    #[test]
    fn test_odd_leaf_is_paired_with_itself() {
        let l = leaves(3);
        let mut h = Sha256::new();
        h.update(l[2].as_bytes());
        h.update(l[2].as_bytes());
        let right = Hash::from_bytes(h.finalize().into());
        assert_eq!(merkle_root(&l), merkle_root(&[merkle_root(&l[..2]), right]));
    }

    #[test]
    fn test_root_is_deterministic_and_order_sensitive() {
        let l = leaves(5);
        let a = MerkleTree::build_from_hashes(l.clone(), MerkleKind::Transactions);
        let b = MerkleTree::build_from_hashes(l.clone(), MerkleKind::Transactions);
        assert_eq!(a.calculate_hash(), b.calculate_hash());

        let mut reordered = l;
        reordered.swap(0, 1);
        let c = MerkleTree::build_from_hashes(reordered, MerkleKind::Transactions);
        assert_ne!(a.root(), c.root());
    }

    #[test]
    fn test_lazy_root_matches_built_root() {
        let built = MerkleTree::build_from_hashes(leaves(4), MerkleKind::Diffs);
        let lazy = MerkleTree {
            root_hash: None,
            ..built.clone()
        };
        assert_eq!(lazy.root(), built.root());
        assert_eq!(lazy.root(), lazy.root());
    }

    #[test]
    fn test_canonical_order_sorts_and_dedups() {
        let mut l = leaves(4);
        l.push(l[0]);
        let ordered = MerkleTree::canonical_order(l.iter().rev().copied());
        assert_eq!(ordered.len(), 4);
        assert!(ordered.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_kind_tags() {
        for kind in [
            MerkleKind::StatechainBlocks,
            MerkleKind::MainchainBlocks,
            MerkleKind::Transactions,
            MerkleKind::Diffs,
            MerkleKind::MerkleTrees,
        ] {
            assert_eq!(kind.as_str().parse::<MerkleKind>().unwrap(), kind);
            assert_eq!(
                serde_json::to_string(&kind).unwrap(),
                format!("\"{}\"", kind.as_str())
            );
        }
        assert!(matches!(
            "blocks".parse::<MerkleKind>(),
            Err(ChainError::UnknownKind(_))
        ));
    }

    #[test]
    fn test_unknown_kind_in_encoding_is_malformed() {
        let tree = MerkleTree::build_from_hashes(leaves(1), MerkleKind::Diffs);
        let json = serde_json::to_string(&tree).unwrap().replace("diffs", "widgets");
        assert!(serde_json::from_str::<MerkleTree>(&json).is_err());

        let mut bytes = tree.to_bytes().unwrap();
        // bincode stores the variant index right after the optional root
        let variant_at = 1 + 8 + 66;
        bytes[variant_at] = 9;
        assert!(matches!(
            MerkleTree::from_bytes(&bytes),
            Err(ChainError::MalformedEntity(_))
        ));
    }
}
