//! Block registry: the pool's table of blocks and their last known status.
//!
//! Entries stay in submission order. That order is the scale-in policy:
//! the oldest running blocks are cancelled first.

use std::collections::HashMap;

use enginepool_core::{BlockId, BlockStatus};

/// A block and the status most recently reported for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRecord {
    pub id: BlockId,
    pub status: BlockStatus,
}

#[derive(Debug, Default)]
pub struct BlockRegistry {
    blocks: Vec<BlockRecord>,
}

impl BlockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly submitted block as pending.
    ///
    /// Returns `false` and leaves the entry untouched if the id is known.
    pub fn record(&mut self, id: BlockId) -> bool {
        if self.position(&id).is_some() {
            return false;
        }
        self.blocks.push(BlockRecord {
            id,
            status: BlockStatus::Pending,
        });
        true
    }

    /// Apply a bulk status report. Returns how many entries changed.
    ///
    /// Blocks missing from the report keep their previous status; ids the
    /// registry does not know are ignored.
    pub fn refresh(&mut self, statuses: &HashMap<BlockId, BlockStatus>) -> usize {
        let mut changed = 0;
        for record in &mut self.blocks {
            if let Some(status) = statuses.get(&record.id)
                && record.status != *status
            {
                record.status = *status;
                changed += 1;
            }
        }
        changed
    }

    /// Up to `n` running blocks, oldest first.
    pub fn select_cancellable(&self, n: usize) -> Vec<BlockId> {
        self.blocks
            .iter()
            .filter(|r| r.status == BlockStatus::Running)
            .take(n)
            .map(|r| r.id.clone())
            .collect()
    }

    pub fn remove(&mut self, id: &BlockId) -> Option<BlockRecord> {
        let idx = self.position(id)?;
        Some(self.blocks.remove(idx))
    }

    /// Drop every entry, returning the records in submission order.
    pub fn clear(&mut self) -> Vec<BlockRecord> {
        std::mem::take(&mut self.blocks)
    }

    #[cfg(test)]
    fn status_of(&self, id: &BlockId) -> Option<BlockStatus> {
        self.position(id).map(|idx| self.blocks[idx].status)
    }

    pub fn ids(&self) -> Vec<BlockId> {
        self.blocks.iter().map(|r| r.id.clone()).collect()
    }

    pub fn snapshot(&self) -> Vec<BlockRecord> {
        self.blocks.clone()
    }

    pub fn count(&self, status: BlockStatus) -> usize {
        self.blocks.iter().filter(|r| r.status == status).count()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    fn position(&self, id: &BlockId) -> Option<usize> {
        self.blocks.iter().position(|r| r.id == *id)
    }
}
