//! Error types for the mining and verification engine

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum ChainError {
    /// Bytes could not be decoded into an entity, or an entity is missing a required field.
    MalformedEntity(String),
    /// Merkle tree kind tag outside the fixed enumeration.
    UnknownKind(String),
    /// A statechain or mainchain link could not be resolved.
    BrokenChain(String),
    InvalidTransaction(String),
    InvalidBlock(String),
    /// Sandbox failed to execute a transaction.
    ExecutionError(String),
    StoreError(String),
    DiffError(String),
    /// `diff` was asked to compare identical inputs.
    NoDifferences,
    /// State generation was given an empty diff chain.
    NoDiffs,
    CryptoError(String),
    Cancelled,
    IncompleteBlock(String),
    ConfigError(String),
    IoError(String),
    BincodeError(String),
}

impl ChainError {
    /// True for failures raised by a collaborator (store, sandbox, diff engine, disk)
    /// rather than by the data being checked.
    pub fn is_collaborator_failure(&self) -> bool {
        matches!(
            self,
            ChainError::ExecutionError(_)
                | ChainError::StoreError(_)
                | ChainError::DiffError(_)
                | ChainError::IoError(_)
        )
    }
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ChainError::MalformedEntity(msg) => write!(f, "Malformed entity: {}", msg),
            ChainError::UnknownKind(kind) => write!(f, "Unknown merkle tree kind: {}", kind),
            ChainError::BrokenChain(msg) => write!(f, "Broken chain: {}", msg),
            ChainError::InvalidTransaction(msg) => write!(f, "Invalid transaction: {}", msg),
            ChainError::InvalidBlock(msg) => write!(f, "Invalid block: {}", msg),
            ChainError::ExecutionError(msg) => write!(f, "Sandbox execution error: {}", msg),
            ChainError::StoreError(msg) => write!(f, "Content store error: {}", msg),
            ChainError::DiffError(msg) => write!(f, "Diff engine error: {}", msg),
            ChainError::NoDifferences => write!(f, "No differences between inputs"),
            ChainError::NoDiffs => write!(f, "No diffs to generate state from"),
            ChainError::CryptoError(msg) => write!(f, "Cryptographic error: {}", msg),
            ChainError::Cancelled => write!(f, "Operation cancelled"),
            ChainError::IncompleteBlock(msg) => write!(f, "Incomplete block: {}", msg),
            ChainError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            ChainError::IoError(msg) => write!(f, "IO error: {}", msg),
            ChainError::BincodeError(msg) => write!(f, "Bincode error: {}", msg),
        }
    }
}

impl std::error::Error for ChainError {}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::IoError(err.to_string())
    }
}

impl From<Box<bincode::ErrorKind>> for ChainError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        ChainError::BincodeError(err.to_string())
    }
}

impl From<rusqlite::Error> for ChainError {
    fn from(err: rusqlite::Error) -> Self {
        ChainError::StoreError(err.to_string())
    }
}

impl From<toml::de::Error> for ChainError {
    fn from(err: toml::de::Error) -> Self {
        ChainError::ConfigError(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;
