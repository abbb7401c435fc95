//! Window of recently delivered, not yet final blocks.
//!
//! Holds the hash delivered at each non-final level so a reorganization
//! can be walked back to the first level whose hash changed. Levels past
//! the finality depth are pruned; the chain can no longer replace them.

use std::collections::BTreeMap;

use crate::tezos::types::BlockHash;

#[derive(Debug, Default)]
pub struct BlockWindow {
    /// level -> delivered hash
    blocks: BTreeMap<u64, BlockHash>,
}

impl BlockWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record (or replace) the hash delivered at `level`.
    pub fn record(&mut self, level: u64, hash: BlockHash) {
        self.blocks.insert(level, hash);
    }

    pub fn hash_at(&self, level: u64) -> Option<&BlockHash> {
        self.blocks.get(&level)
    }

    /// Drop levels that are final relative to `head_level`.
    pub fn prune_final(&mut self, head_level: u64, finality_depth: u64) {
        let Some(oldest_unfinal) = head_level
            .checked_sub(finality_depth)
            .map(|final_level| final_level + 1)
        else {
            return;
        };
        self.blocks = self.blocks.split_off(&oldest_unfinal);
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Lowest and highest tracked levels.
    pub fn range(&self) -> Option<(u64, u64)> {
        let min = self.blocks.keys().next()?;
        let max = self.blocks.keys().next_back()?;
        Some((*min, *max))
    }
}
