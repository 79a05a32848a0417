use crate::blockchain::Entity;
use crate::hashing::{Hash, Hasher};
use serde::{Deserialize, Serialize};

/// One state transition of an application: the effect of a single transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatechainBlock {
    pub block_hash: Option<Hash>,
    pub block_number: u64,
    pub block_time: u64,
    pub image_hash: Hash,
    pub tx_hash: Hash,
    pub prev_block_hash: Option<Hash>,
    /// Hash of the diff that turns the previous state into this block's state.
    pub state_prev_diff_hash: Hash,
    /// Hash of the materialized state after the transaction.
    pub state_current_hash: Hash,
}

impl StatechainBlock {
    pub fn is_genesis(&self) -> bool {
        self.block_number == 0
    }
}

impl Entity for StatechainBlock {
    const NAME: &'static str = "statechain block";

    fn calculate_hash(&self) -> Hash {
        let mut hasher = Hasher::new();
        hasher
            .u64(self.block_number)
            .u64(self.block_time)
            .hash(&self.image_hash)
            .hash(&self.tx_hash)
            .opt_hash(self.prev_block_hash.as_ref())
            .hash(&self.state_prev_diff_hash)
            .hash(&self.state_current_hash);
        hasher.finish()
    }

    fn hash(&self) -> Option<Hash> {
        self.block_hash
    }

    fn set_hash(&mut self) {
        self.block_hash = Some(self.calculate_hash());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::hash;

    fn sample() -> StatechainBlock {
        StatechainBlock {
            block_hash: None,
            block_number: 0,
            block_time: 1_700_000_000,
            image_hash: hash(b"image"),
            tx_hash: hash(b"tx"),
            prev_block_hash: None,
            state_prev_diff_hash: hash(b"diff"),
            state_current_hash: hash(b"state"),
        }
    }

    #[test]
    fn test_round_trip_and_hash() {
        let mut block = sample();
        block.set_hash();
        let decoded = StatechainBlock::from_bytes(&block.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, block);
        assert!(decoded.has_valid_hash());
    }

    #[test]
    fn test_linkage_is_committed() {
        let mut a = sample();
        a.block_number = 1;
        let mut b = a.clone();
        b.prev_block_hash = Some(hash(b"parent"));
        assert_ne!(a.calculate_hash(), b.calculate_hash());
        assert!(sample().is_genesis());
        assert!(!a.is_genesis());
    }
}
