/// Validation logic for transactions separated from type definitions
use crate::blockchain::Entity;
use crate::crypto::Signer;
use crate::error::{ChainError, Result};
use crate::transaction::types::Transaction;

impl Transaction {
    /// Checks the hash and signature without any chain context. Shared by the miner,
    /// which drops failing transactions, and the verifier, which rejects blocks
    /// carrying them.
    pub fn verify(&self, signer: &dyn Signer) -> Result<()> {
        let tx_hash = self.tx_hash.ok_or_else(|| {
            ChainError::InvalidTransaction("Transaction has no hash".to_string())
        })?;
        let sig = self.sig.as_ref().ok_or_else(|| {
            ChainError::InvalidTransaction(format!("Transaction {} not signed", tx_hash))
        })?;

        if self.calculate_hash() != tx_hash {
            return Err(ChainError::InvalidTransaction(format!(
                "Transaction {} hash does not match its contents",
                tx_hash
            )));
        }

        let public_key = signer.decode_address(&self.from).map_err(|e| {
            ChainError::InvalidTransaction(format!("Invalid from address {}: {}", self.from, e))
        })?;

        let valid = signer
            .verify(&public_key, tx_hash.as_bytes(), sig)
            .map_err(|e| ChainError::InvalidTransaction(format!("Malformed signature: {}", e)))?;
        if !valid {
            return Err(ChainError::InvalidTransaction(format!(
                "Transaction {} signature does not verify against {}",
                tx_hash, self.from
            )));
        }

        Ok(())
    }

    pub fn is_valid(&self, signer: &dyn Signer) -> bool {
        self.verify(signer).is_ok()
    }
}
