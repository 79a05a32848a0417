//! Hashing primitives and content addressing.
//!
//! Every entity identity in the engine is a SHA-256 digest rendered as `0x`-prefixed
//! lowercase hex. Content-store keys are derived from those hashes with
//! [`content_id`], which is stable across implementations so peers agree on where a
//! piece of content lives.

use crate::error::{ChainError, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

pub const HASH_PREFIX: &str = "0x";
pub const HASH_SIZE: usize = 32;

/// Image hash of the mainchain: the hash of an empty byte string.
pub static MAINCHAIN_IMAGE_HASH: Lazy<Hash> = Lazy::new(|| hash(&[]));

// CIDv1, raw codec, sha2-256 multihash of 32 bytes
const CID_HEADER: [u8; 4] = [0x01, 0x55, 0x12, 0x20];
const MULTIBASE_BASE16: char = 'f';

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash([u8; HASH_SIZE]);

impl Hash {
    pub const fn from_bytes(bytes: [u8; HASH_SIZE]) -> Self {
        Hash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    /// Parses a hex digest, with or without the `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self> {
        let digits = s.strip_prefix(HASH_PREFIX).unwrap_or(s);
        let bytes = hex::decode(digits)
            .map_err(|e| ChainError::MalformedEntity(format!("Invalid hex hash {}: {}", s, e)))?;
        let bytes: [u8; HASH_SIZE] = bytes.try_into().map_err(|v: Vec<u8>| {
            ChainError::MalformedEntity(format!(
                "Hash must be {} bytes, got {}",
                HASH_SIZE,
                v.len()
            ))
        })?;
        Ok(Hash(bytes))
    }

    /// Hex digits without the prefix.
    pub fn digits(&self) -> String {
        hex::encode(self.0)
    }

    pub fn to_hex(&self) -> String {
        format!("{}{}", HASH_PREFIX, self.digits())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}", HASH_PREFIX, self.digits())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Hash({})", self)
    }
}

impl FromStr for Hash {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self> {
        Hash::from_hex(s)
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// SHA-256 of arbitrary bytes.
pub fn hash(bytes: &[u8]) -> Hash {
    Hash(Sha256::digest(bytes).into())
}

/// Store key derived from a hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentId(String);

impl ContentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn content_id(hash: &Hash) -> ContentId {
    let digest = Sha256::digest(hash.to_hex().as_bytes());
    let mut cid = Vec::with_capacity(CID_HEADER.len() + HASH_SIZE);
    cid.extend_from_slice(&CID_HEADER);
    cid.extend_from_slice(&digest);
    ContentId(format!("{}{}", MULTIBASE_BASE16, hex::encode(cid)))
}

/// Incremental hasher over length-prefixed fields, so that adjacent variable-length
/// fields can never be confused with one another.
pub struct Hasher(Sha256);

impl Hasher {
    pub fn new() -> Self {
        Hasher(Sha256::new())
    }

    pub fn u64(&mut self, value: u64) -> &mut Self {
        self.0.update(value.to_le_bytes());
        self
    }

    pub fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.0.update((bytes.len() as u64).to_le_bytes());
        self.0.update(bytes);
        self
    }

    pub fn str(&mut self, s: &str) -> &mut Self {
        self.bytes(s.as_bytes())
    }

    pub fn hash(&mut self, h: &Hash) -> &mut Self {
        self.0.update(h.as_bytes());
        self
    }

    pub fn opt_hash(&mut self, h: Option<&Hash>) -> &mut Self {
        match h {
            Some(h) => {
                self.0.update([1u8]);
                self.hash(h)
            }
            None => {
                self.0.update([0u8]);
                self
            }
        }
    }

    pub fn finish(self) -> Hash {
        Hash(self.0.finalize().into())
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}
