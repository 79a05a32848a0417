/// Transaction types for application statechains
use crate::blockchain::Entity;
use crate::crypto::{EcdsaSignature, Signer};
use crate::error::Result;
use crate::hashing::{Hash, Hasher};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Method {
    /// Creates the application's genesis state from the payload.
    Deploy,
    /// Runs the payload through the application's sandbox against its current state.
    InvokeMethod,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Deploy => "deploy",
            Method::InvokeMethod => "invokeMethod",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub tx_hash: Option<Hash>,
    pub image_hash: Hash,
    pub method: Method,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
    /// Encoded public key of the sender.
    pub from: String,
    pub sig: Option<EcdsaSignature>,
}

impl Transaction {
    pub fn new(image_hash: Hash, method: Method, payload: Vec<u8>, from: impl Into<String>) -> Self {
        Transaction {
            tx_hash: None,
            image_hash,
            method,
            payload,
            from: from.into(),
            sig: None,
        }
    }

    pub fn is_deploy(&self) -> bool {
        self.method == Method::Deploy
    }

    /// Sets the hash and signs its bytes.
    pub fn sign(&mut self, signer: &dyn Signer, secret_key: &[u8]) -> Result<()> {
        self.set_hash();
        let hash = self.require_hash()?;
        self.sig = Some(signer.sign(secret_key, hash.as_bytes())?);
        Ok(())
    }
}

impl Entity for Transaction {
    const NAME: &'static str = "transaction";

    fn calculate_hash(&self) -> Hash {
        let mut hasher = Hasher::new();
        hasher
            .hash(&self.image_hash)
            .str(self.method.as_str())
            .bytes(&self.payload)
            .str(&self.from);
        hasher.finish()
    }

    fn hash(&self) -> Option<Hash> {
        self.tx_hash
    }

    fn set_hash(&mut self) {
        self.tx_hash = Some(self.calculate_hash());
    }
}
