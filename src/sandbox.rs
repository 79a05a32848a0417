//! Execution of application transactions.

use crate::error::Result;
use crate::hashing::Hash;
use async_trait::async_trait;

/// Runs one transaction payload of an application against its current state.
///
/// Implementations must be deterministic: the verifier replays every transaction and
/// expects byte-identical states. Failures are reported as
/// [`ChainError::ExecutionError`](crate::error::ChainError::ExecutionError).
#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn apply(&self, image_hash: &Hash, payload: &[u8], prior_state: &[u8]) -> Result<Vec<u8>>;
}
