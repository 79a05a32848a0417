// Ledger entities: mainchain blocks, statechain blocks, diffs and merkle trees.
// Transactions live in `crate::transaction` but share the `Entity` contract below.

pub mod diff;
pub mod mainchain;
pub mod merkle;
pub mod statechain;

pub use diff::Diff;
pub use mainchain::MainchainBlock;
pub use merkle::{merkle_root, MerkleKind, MerkleTree};
pub use statechain::StatechainBlock;

use crate::error::{ChainError, Result};
use crate::hashing::Hash;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Content-addressed value with a canonical encoding and a self-hash.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync {
    /// Name used in log lines and lookup errors.
    const NAME: &'static str;

    /// Hash over the canonical fields, ignoring any stored hash or signature.
    fn calculate_hash(&self) -> Hash;

    /// The stored hash, if one has been set.
    fn hash(&self) -> Option<Hash>;

    fn set_hash(&mut self);

    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| ChainError::MalformedEntity(format!("{}: {}", Self::NAME, e)))
    }

    /// The stored hash, or `MalformedEntity` when it was never set.
    fn require_hash(&self) -> Result<Hash> {
        self.hash()
            .ok_or_else(|| ChainError::MalformedEntity(format!("{} has no hash", Self::NAME)))
    }

    /// True when a hash is stored and matches the canonical fields.
    fn has_valid_hash(&self) -> bool {
        self.hash() == Some(self.calculate_hash())
    }
}
