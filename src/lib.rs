//! imagechain - mining and verification engine for a mainchain that commits to
//! per-application statechains
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Core Ledger
//! - [`hashing`] - SHA-256 hashes and content identifiers
//! - [`blockchain`] - Mainchain/statechain blocks, diffs, merkle trees
//! - [`transaction`] - Application transactions and their validation
//!
//! ## Mining & Verification
//! - [`reconstruct`] - Rebuilding application state from diff chains
//! - [`miner`] - Building, committing, and sealing candidate blocks
//! - [`verifier`] - Re-deriving every commitment of a received block
//!
//! ## Collaborators
//! - [`crypto`] - Signatures and addresses (secp256k1)
//! - [`differ`] - Text diff engine
//! - [`sandbox`] - Application execution
//! - [`context`] - Handles passed to the miner and verifier
//!
//! ## Persistence
//! - [`persistence`] - Content-addressed store (memory, SQLite)
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`logging`] - Tracing subscriber setup
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Core Ledger
// ============================================================================
pub mod blockchain;
pub mod hashing;
pub mod transaction;

// ============================================================================
// Mining & Verification
// ============================================================================
pub mod miner;
pub mod reconstruct;
pub mod verifier;

// ============================================================================
// Collaborators
// ============================================================================
pub mod context;
pub mod crypto;
pub mod differ;
pub mod sandbox;

// ============================================================================
// Persistence
// ============================================================================
pub mod persistence;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;
pub mod logging;

pub use blockchain::{Diff, Entity, MainchainBlock, MerkleKind, MerkleTree, StatechainBlock};
pub use context::EngineContext;
pub use error::{ChainError, Result};
pub use hashing::{content_id, hash, ContentId, Hash, MAINCHAIN_IMAGE_HASH};
pub use miner::{MinedBlock, Miner, MiningState};
pub use transaction::{Method, Transaction};
pub use verifier::{Rejection, Step, Verdict, Verifier};
