//! Signing and verification with secp256k1

use crate::error::{ChainError, Result};
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use secp256k1::{
    constants::{COMPACT_SIGNATURE_SIZE, PUBLIC_KEY_SIZE, SECRET_KEY_SIZE},
    ecdsa::Signature,
    All, Message, PublicKey, Secp256k1, SecretKey,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A thread-safe, lazily initialized Secp256k1 context.
static SECP256K1_CONTEXT: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

const ADDRESS_PREFIX: &str = "0x";

/// ECDSA signature split into its two scalars, each `0x`-prefixed hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcdsaSignature {
    pub r: String,
    pub s: String,
}

impl EcdsaSignature {
    pub fn from_compact(bytes: &[u8; COMPACT_SIGNATURE_SIZE]) -> Self {
        let (r, s) = bytes.split_at(COMPACT_SIGNATURE_SIZE / 2);
        EcdsaSignature {
            r: format!("{}{}", ADDRESS_PREFIX, hex::encode(r)),
            s: format!("{}{}", ADDRESS_PREFIX, hex::encode(s)),
        }
    }

    pub fn to_compact(&self) -> Result<[u8; COMPACT_SIGNATURE_SIZE]> {
        let mut out = [0u8; COMPACT_SIGNATURE_SIZE];
        let half = COMPACT_SIGNATURE_SIZE / 2;
        let (r_slot, s_slot) = out.split_at_mut(half);
        for (scalar, slot) in [(&self.r, r_slot), (&self.s, s_slot)] {
            let digits = scalar.strip_prefix(ADDRESS_PREFIX).unwrap_or(scalar);
            let bytes = hex::decode(digits)
                .map_err(|e| ChainError::CryptoError(format!("Invalid signature hex: {}", e)))?;
            if bytes.len() != half {
                return Err(ChainError::CryptoError(format!(
                    "Signature scalar must be {} bytes, got {}",
                    half,
                    bytes.len()
                )));
            }
            slot.copy_from_slice(&bytes);
        }
        Ok(out)
    }
}

/// Signature primitives consumed by the engine.
pub trait Signer: Send + Sync {
    fn sign(&self, secret_key: &[u8], message: &[u8]) -> Result<EcdsaSignature>;

    /// `Ok(false)` when the signature does not match; `Err` when the inputs are unusable.
    fn verify(&self, public_key: &[u8], message: &[u8], signature: &EcdsaSignature)
        -> Result<bool>;

    fn encode_address(&self, public_key: &[u8]) -> Result<String>;

    fn decode_address(&self, address: &str) -> Result<Vec<u8>>;
}

/// Default [`Signer`]: compact ECDSA over the SHA-256 digest of the message.
#[derive(Debug, Clone, Copy, Default)]
pub struct Secp256k1Signer;

impl Signer for Secp256k1Signer {
    fn sign(&self, secret_key: &[u8], message: &[u8]) -> Result<EcdsaSignature> {
        let keypair = KeyPair::from_secret_bytes(secret_key)?;
        Ok(EcdsaSignature::from_compact(&keypair.sign(message)?))
    }

    fn verify(
        &self,
        public_key: &[u8],
        message: &[u8],
        signature: &EcdsaSignature,
    ) -> Result<bool> {
        let compact = signature.to_compact()?;
        match verify_signature(public_key, message, &compact) {
            Ok(()) => Ok(true),
            Err(ChainError::CryptoError(msg)) if msg == SIGNATURE_MISMATCH => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn encode_address(&self, public_key: &[u8]) -> Result<String> {
        let key = PublicKey::from_slice(public_key)
            .map_err(|e| ChainError::CryptoError(format!("Invalid public key: {}", e)))?;
        Ok(format!("{}{}", ADDRESS_PREFIX, hex::encode(key.serialize())))
    }

    fn decode_address(&self, address: &str) -> Result<Vec<u8>> {
        let digits = address.strip_prefix(ADDRESS_PREFIX).ok_or_else(|| {
            ChainError::CryptoError(format!("Address {} is missing the 0x prefix", address))
        })?;
        let bytes = hex::decode(digits)
            .map_err(|e| ChainError::CryptoError(format!("Invalid hex address: {}", e)))?;
        PublicKey::from_slice(&bytes)
            .map_err(|e| ChainError::CryptoError(format!("Invalid public key: {}", e)))?;
        Ok(bytes)
    }
}

#[derive(Debug, Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generates a new random KeyPair using the OS random number generator.
    pub fn generate() -> Self {
        let secret_key = SecretKey::new(&mut OsRng);
        Self::from_secret_key(secret_key)
    }

    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let public_key = PublicKey::from_secret_key(&SECP256K1_CONTEXT, &secret_key);
        KeyPair {
            secret_key,
            public_key,
        }
    }

    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        let secret_key = SecretKey::from_slice(bytes).map_err(|e| {
            if bytes.len() != SECRET_KEY_SIZE {
                ChainError::CryptoError(format!(
                    "Secret key must be {} bytes, got {}",
                    SECRET_KEY_SIZE,
                    bytes.len()
                ))
            } else {
                ChainError::CryptoError(format!("Invalid secret key bytes: {}", e))
            }
        })?;

        Ok(Self::from_secret_key(secret_key))
    }

    pub fn secret_bytes(&self) -> [u8; SECRET_KEY_SIZE] {
        self.secret_key.secret_bytes()
    }

    /// Compressed public key bytes.
    pub fn public_key_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.public_key.serialize()
    }

    /// Encoded address accepted by [`Signer::decode_address`].
    pub fn address(&self) -> String {
        format!("{}{}", ADDRESS_PREFIX, hex::encode(self.public_key_bytes()))
    }

    /// Signs the SHA-256 digest of `message` and returns the compact signature bytes.
    pub fn sign(&self, message: &[u8]) -> Result<[u8; COMPACT_SIGNATURE_SIZE]> {
        let digest = Sha256::digest(message);
        let message = Message::from_digest_slice(&digest)
            .map_err(|e| ChainError::CryptoError(format!("Failed to create message: {}", e)))?;
        let signature = SECP256K1_CONTEXT.sign_ecdsa(&message, &self.secret_key);
        Ok(signature.serialize_compact())
    }
}

const SIGNATURE_MISMATCH: &str = "Signature verification failed";

/// Verifies a compact ECDSA signature given the raw public key bytes and message.
pub fn verify_signature(
    public_key_bytes: &[u8],
    message: &[u8],
    signature_bytes: &[u8],
) -> Result<()> {
    if public_key_bytes.len() != PUBLIC_KEY_SIZE {
        return Err(ChainError::CryptoError(format!(
            "Public key must be exactly {} bytes (compressed), got {}",
            PUBLIC_KEY_SIZE,
            public_key_bytes.len()
        )));
    }
    if signature_bytes.len() != COMPACT_SIGNATURE_SIZE {
        return Err(ChainError::CryptoError(format!(
            "Signature must be exactly {} bytes (compact), got {}",
            COMPACT_SIGNATURE_SIZE,
            signature_bytes.len()
        )));
    }

    let public_key = PublicKey::from_slice(public_key_bytes)
        .map_err(|e| ChainError::CryptoError(format!("Invalid public key: {}", e)))?;

    let digest = Sha256::digest(message);
    let message = Message::from_digest_slice(&digest)
        .map_err(|e| ChainError::CryptoError(format!("Failed to create message: {}", e)))?;

    let signature = Signature::from_compact(signature_bytes)
        .map_err(|e| ChainError::CryptoError(format!("Invalid signature: {}", e)))?;

    SECP256K1_CONTEXT
        .verify_ecdsa(&message, &signature, &public_key)
        .map_err(|_| ChainError::CryptoError(SIGNATURE_MISMATCH.to_string()))
}
