use crate::blockchain::merkle::merkle_root;
use crate::blockchain::Entity;
use crate::crypto::{EcdsaSignature, Signer};
use crate::error::{ChainError, Result};
use crate::hashing::{Hash, Hasher, MAINCHAIN_IMAGE_HASH};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MainchainBlock {
    pub block_hash: Option<Hash>,
    pub block_number: u64,
    /// Unix seconds.
    pub block_time: u64,
    pub image_hash: Hash,
    pub state_blocks_merkle_hash: Hash,
    pub prev_block_hash: Option<Hash>,
    pub nonce: String,
    pub difficulty: u64,
    pub miner_address: String,
    pub miner_sig: Option<EcdsaSignature>,
}

impl MainchainBlock {
    /// The fixed head every mainchain starts from. It commits to no statechain blocks.
    pub fn genesis() -> Self {
        let mut block = MainchainBlock {
            block_hash: None,
            block_number: 0,
            block_time: 0,
            image_hash: *MAINCHAIN_IMAGE_HASH,
            state_blocks_merkle_hash: merkle_root(&[]),
            prev_block_hash: None,
            nonce: String::new(),
            difficulty: 0,
            miner_address: String::new(),
            miner_sig: None,
        };
        block.set_hash();
        block
    }

    /// Unmined successor of `prev`, stamped with the current time. Fails when `prev`
    /// already carries the last representable block number.
    pub fn next(prev: &MainchainBlock, difficulty: u64, miner_address: &str) -> Result<Self> {
        let block_number = prev.block_number.checked_add(1).ok_or_else(|| {
            ChainError::InvalidBlock(format!(
                "block number {} has no successor",
                prev.block_number
            ))
        })?;
        Ok(MainchainBlock {
            block_hash: None,
            block_number,
            block_time: chrono::Utc::now().timestamp().max(0) as u64,
            image_hash: *MAINCHAIN_IMAGE_HASH,
            state_blocks_merkle_hash: merkle_root(&[]),
            prev_block_hash: prev.block_hash,
            nonce: String::new(),
            difficulty,
            miner_address: miner_address.to_string(),
            miner_sig: None,
        })
    }

    pub fn is_genesis(&self) -> bool {
        self.block_number == 0 && self.prev_block_hash.is_none()
    }

    /// Signs the block hash bytes. The hash must already be set.
    pub fn sign(&mut self, signer: &dyn Signer, secret_key: &[u8]) -> Result<()> {
        let hash = self.block_hash.ok_or_else(|| {
            ChainError::IncompleteBlock("cannot sign a block without a hash".to_string())
        })?;
        self.miner_sig = Some(signer.sign(secret_key, hash.as_bytes())?);
        Ok(())
    }
}

impl Entity for MainchainBlock {
    const NAME: &'static str = "mainchain block";

    fn calculate_hash(&self) -> Hash {
        let mut hasher = Hasher::new();
        hasher
            .u64(self.block_number)
            .u64(self.block_time)
            .hash(&self.image_hash)
            .hash(&self.state_blocks_merkle_hash)
            .opt_hash(self.prev_block_hash.as_ref())
            .str(&self.nonce)
            .u64(self.difficulty)
            .str(&self.miner_address);
        hasher.finish()
    }

    fn hash(&self) -> Option<Hash> {
        self.block_hash
    }

    fn set_hash(&mut self) {
        self.block_hash = Some(self.calculate_hash());
    }
}
