//! Handles to every collaborator the engine calls, passed explicitly to the miner and
//! verifier instead of living in global state.

use crate::crypto::{Secp256k1Signer, Signer};
use crate::differ::{DiffEngine, LineDiffEngine};
use crate::error::{ChainError, Result};
use crate::persistence::BlockStore;
use crate::sandbox::Sandbox;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct EngineContext {
    pub store: BlockStore,
    pub sandbox: Arc<dyn Sandbox>,
    pub differ: Arc<dyn DiffEngine>,
    pub signer: Arc<dyn Signer>,
    pub cancel: CancellationToken,
}

impl EngineContext {
    pub fn new(
        store: BlockStore,
        sandbox: Arc<dyn Sandbox>,
        differ: Arc<dyn DiffEngine>,
        signer: Arc<dyn Signer>,
    ) -> Self {
        EngineContext {
            store,
            sandbox,
            differ,
            signer,
            cancel: CancellationToken::new(),
        }
    }

    /// Context with the default diff engine and secp256k1 signer.
    pub fn with_defaults(store: BlockStore, sandbox: Arc<dyn Sandbox>) -> Self {
        Self::new(
            store,
            sandbox,
            Arc::new(LineDiffEngine),
            Arc::new(Secp256k1Signer),
        )
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Same collaborators, with a token that is cancelled along with this one but can
    /// also be cancelled on its own.
    pub fn child(&self) -> Self {
        EngineContext {
            cancel: self.cancel.child_token(),
            ..self.clone()
        }
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(ChainError::Cancelled);
        }
        Ok(())
    }
}
