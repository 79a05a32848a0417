use crate::blockchain::Entity;
use crate::hashing::{hash, Hash};
use serde::{Deserialize, Serialize};

/// A textual patch between two consecutive application states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diff {
    pub diff_hash: Option<Hash>,
    pub data: String,
}

impl Diff {
    /// Builds a diff with its hash already set.
    pub fn new(data: impl Into<String>) -> Self {
        let mut diff = Diff {
            diff_hash: None,
            data: data.into(),
        };
        diff.set_hash();
        diff
    }
}

impl Entity for Diff {
    const NAME: &'static str = "diff";

    fn calculate_hash(&self) -> Hash {
        hash(self.data.as_bytes())
    }

    fn hash(&self) -> Option<Hash> {
        self.diff_hash
    }

    fn set_hash(&mut self) {
        self.diff_hash = Some(self.calculate_hash());
    }
}
