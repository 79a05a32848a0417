//! Content-addressed storage for ledger entities.
//!
//! [`ContentStore`] is the narrow byte-level interface a networking layer provides
//! (get/put by hash). [`BlockStore`] wraps any implementation with typed accessors and
//! the chain walks the miner and verifier need.

use crate::blockchain::{Diff, Entity, MainchainBlock, MerkleTree, StatechainBlock};
use crate::error::{ChainError, Result};
use crate::hashing::{content_id, ContentId, Hash};
use crate::miner::MinedBlock;
use crate::transaction::Transaction;
use async_trait::async_trait;
use parking_lot::RwLock;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, trace};

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Bytes stored under `hash`, or `None` when nothing is stored there.
    async fn get(&self, hash: &Hash) -> Result<Option<Vec<u8>>>;

    async fn put(&self, hash: &Hash, bytes: Vec<u8>) -> Result<ContentId>;
}

/// Typed view over a [`ContentStore`].
#[derive(Clone)]
pub struct BlockStore {
    inner: Arc<dyn ContentStore>,
}

impl BlockStore {
    pub fn new(inner: Arc<dyn ContentStore>) -> Self {
        BlockStore { inner }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub async fn get_entity<E: Entity>(&self, hash: &Hash) -> Result<Option<E>> {
        match self.inner.get(hash).await? {
            Some(bytes) => E::from_bytes(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Like [`get_entity`](Self::get_entity) but a missing entity is a broken link.
    pub async fn require<E: Entity>(&self, hash: &Hash) -> Result<E> {
        self.get_entity(hash)
            .await?
            .ok_or_else(|| ChainError::BrokenChain(format!("{} {} not found", E::NAME, hash)))
    }

    pub async fn put_entity<E: Entity>(&self, entity: &E) -> Result<ContentId> {
        let hash = entity.require_hash()?;
        let cid = self.inner.put(&hash, entity.to_bytes()?).await?;
        trace!(kind = E::NAME, %hash, %cid, "stored entity");
        Ok(cid)
    }

    pub async fn get_mainchain_block(&self, hash: &Hash) -> Result<MainchainBlock> {
        self.require(hash).await
    }

    pub async fn get_statechain_block(&self, hash: &Hash) -> Result<StatechainBlock> {
        self.require(hash).await
    }

    pub async fn get_transaction(&self, hash: &Hash) -> Result<Transaction> {
        self.require(hash).await
    }

    pub async fn get_diff(&self, hash: &Hash) -> Result<Diff> {
        self.require(hash).await
    }

    pub async fn get_merkle_tree(&self, hash: &Hash) -> Result<MerkleTree> {
        self.require(hash).await
    }

    /// Latest statechain block for `image_hash` committed at or before `head`.
    ///
    /// Walks the mainchain backwards from `head`. The first mainchain block whose
    /// statechain tree contains blocks for the image decides; within it the highest
    /// block number wins. `None` means the image has no state yet.
    ///
    /// Cost is linear in the mainchain length for an image with no recent activity:
    /// every committed tree on the way is loaded, with each of its statechain blocks.
    /// The walk cannot stop at a tree without the image, since images skip rounds.
    pub async fn most_recent_state_block(
        &self,
        image_hash: &Hash,
        head: &MainchainBlock,
    ) -> Result<Option<StatechainBlock>> {
        let empty_root = crate::blockchain::merkle_root(&[]);
        let mut current = head.clone();

        loop {
            if current.state_blocks_merkle_hash != empty_root {
                let tree = self.get_merkle_tree(&current.state_blocks_merkle_hash).await?;
                let mut latest: Option<StatechainBlock> = None;
                for hash in &tree.hashes {
                    let block = self.get_statechain_block(hash).await?;
                    if &block.image_hash != image_hash {
                        continue;
                    }
                    if latest
                        .as_ref()
                        .map_or(true, |l| block.block_number > l.block_number)
                    {
                        latest = Some(block);
                    }
                }
                if latest.is_some() {
                    return Ok(latest);
                }
            }

            if current.is_genesis() {
                debug!(image = %image_hash, "no statechain block found upstream");
                return Ok(None);
            }
            let prev = current.prev_block_hash.ok_or_else(|| {
                ChainError::BrokenChain(format!(
                    "mainchain block {} has no previous hash",
                    current.block_number
                ))
            })?;
            current = self.get_mainchain_block(&prev).await?;
        }
    }

    /// Persists every entity a finalized block carries, the block itself last.
    pub async fn put_mined_block(&self, mined: &MinedBlock) -> Result<()> {
        for block in mined.statechain_blocks.values() {
            self.put_entity(block).await?;
        }
        for tx in mined.transactions.values() {
            self.put_entity(tx).await?;
        }
        for diff in mined.diffs.values() {
            self.put_entity(diff).await?;
        }
        for tree in mined.merkle_trees.values() {
            self.put_entity(tree).await?;
        }
        self.put_entity(&mined.next_block).await?;
        debug!(
            block_number = mined.next_block.block_number,
            statechain_blocks = mined.statechain_blocks.len(),
            "persisted mined block"
        );
        Ok(())
    }
}

/// In-memory store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<ContentId, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn get(&self, hash: &Hash) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().get(&content_id(hash)).cloned())
    }

    async fn put(&self, hash: &Hash, bytes: Vec<u8>) -> Result<ContentId> {
        let cid = content_id(hash);
        self.entries.write().insert(cid.clone(), bytes);
        Ok(cid)
    }
}

/// SQLite-backed store. Queries run on the blocking pool.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| ChainError::StoreError(format!("Failed to open database: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS content (
                cid TEXT PRIMARY KEY,
                hash TEXT NOT NULL,
                data BLOB NOT NULL
            )",
            [],
        )
        .map_err(|e| ChainError::StoreError(format!("Failed to create content table: {}", e)))?;

        Ok(SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    async fn with_conn<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| ChainError::StoreError("Mutex poisoned".to_string()))?;
            op(&guard)
        })
        .await
        .map_err(|e| ChainError::StoreError(format!("Store task failed: {}", e)))?
    }
}

#[async_trait]
impl ContentStore for SqliteStore {
    async fn get(&self, hash: &Hash) -> Result<Option<Vec<u8>>> {
        let cid = content_id(hash);
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT data FROM content WHERE cid = ?1",
                params![cid.as_str()],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()
            .map_err(|e| ChainError::StoreError(format!("Failed to load {}: {}", cid, e)))
        })
        .await
    }

    async fn put(&self, hash: &Hash, bytes: Vec<u8>) -> Result<ContentId> {
        let cid = content_id(hash);
        let hash_hex = hash.to_hex();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO content (cid, hash, data) VALUES (?1, ?2, ?3)",
                params![cid.as_str(), hash_hex, bytes],
            )
            .map_err(|e| ChainError::StoreError(format!("Failed to save {}: {}", cid, e)))?;
            Ok(cid)
        })
        .await
    }
}
