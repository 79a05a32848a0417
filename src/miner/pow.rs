//! Proof-of-work: leading zero hex digits in the block hash.

use crate::blockchain::{Entity, MainchainBlock};
use crate::error::{ChainError, Result};
use crate::hashing::{Hash, HASH_PREFIX};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// True when the first `difficulty` hex digits of `hash` are all `'0'`.
/// A difficulty that reaches the digit count can never be met.
pub fn meets_difficulty(hash: &Hash, difficulty: u64) -> bool {
    let digits = hash.digits();
    match usize::try_from(difficulty) {
        Ok(d) if d < digits.len() => digits.bytes().take(d).all(|c| c == b'0'),
        _ => false,
    }
}

/// Random 32-byte nonce as prefixed hex.
pub fn generate_nonce() -> String {
    let bytes: [u8; 32] = rand::random();
    format!("{}{}", HASH_PREFIX, hex::encode(bytes))
}

/// Tries random nonces until the block hash meets its difficulty. CPU-bound; run it
/// off the async runtime. Checks `cancel` before every attempt.
pub fn search(mut block: MainchainBlock, cancel: &CancellationToken) -> Result<MainchainBlock> {
    let mut attempts: u64 = 0;
    loop {
        if cancel.is_cancelled() {
            debug!(attempts, "proof-of-work search cancelled");
            return Err(ChainError::Cancelled);
        }
        attempts += 1;

        block.nonce = generate_nonce();
        let hash = block.calculate_hash();
        if meets_difficulty(&hash, block.difficulty) {
            debug!(attempts, %hash, "proof-of-work found");
            block.block_hash = Some(hash);
            return Ok(block);
        }
    }
}

/// Accepts the first candidate after `delay`, for tests and local networks.
pub async fn simulate(
    mut block: MainchainBlock,
    delay: Duration,
    cancel: &CancellationToken,
) -> Result<MainchainBlock> {
    tokio::select! {
        _ = cancel.cancelled() => return Err(ChainError::Cancelled),
        _ = tokio::time::sleep(delay) => {}
    }
    block.nonce = generate_nonce();
    block.set_hash();
    Ok(block)
}
