//! Size-class free list
//!
//! An arena caches released blocks for one (device, stream) scope; the pool
//! owns the scope keying, the arena only manages the blocks. Size classes
//! live in an ordered map so the allocation path can answer "smallest class
//! >= N" in O(log classes) instead of scanning every free block.
//!
//! Invariants:
//! - every size-class entry is non-empty or absent (no empty entries left
//!   behind after a take or remove)
//! - `free_bytes` equals the sum of sizes over all listed blocks
//! - membership here means the region's registry state is `Free`

use std::collections::{BTreeMap, VecDeque};

use crate::block::BlockId;

/// Free-list for a single (device, stream) scope.
#[derive(Debug, Default)]
pub struct Arena {
    /// Size class -> free block ids, FIFO within a class.
    free_by_size: BTreeMap<usize, VecDeque<BlockId>>,
    free_bytes: usize,
}

impl Arena {
    pub fn new() -> Self {
        Arena {
            free_by_size: BTreeMap::new(),
            free_bytes: 0,
        }
    }

    /// Add a freed block to its size class, creating the class on demand.
    pub fn insert(&mut self, size: usize, id: BlockId) {
        self.free_by_size.entry(size).or_default().push_back(id);
        self.free_bytes += size;
    }

    /// Take the oldest block from the smallest size class that can satisfy
    /// `min_size`. Best-fit by class: the first non-empty class at or above
    /// the request wins, without comparing individual blocks.
    pub fn take_best_fit(&mut self, min_size: usize) -> Option<(usize, BlockId)> {
        let (class, id, now_empty) = {
            let (&class, queue) = self.free_by_size.range_mut(min_size..).next()?;
            let id = queue.pop_front()?;
            (class, id, queue.is_empty())
        };
        if now_empty {
            self.free_by_size.remove(&class);
        }
        self.free_bytes -= class;
        Some((class, id))
    }

    /// Remove a specific block from its size class (sweep path). Returns
    /// false if the block was not listed.
    pub fn remove(&mut self, size: usize, id: BlockId) -> bool {
        let Some(queue) = self.free_by_size.get_mut(&size) else {
            return false;
        };
        let Some(pos) = queue.iter().position(|&b| b == id) else {
            return false;
        };
        queue.remove(pos);
        if queue.is_empty() {
            self.free_by_size.remove(&size);
        }
        self.free_bytes -= size;
        true
    }

    /// Snapshot of all free blocks without removing them.
    pub fn free_blocks(&self) -> impl Iterator<Item = (usize, BlockId)> + '_ {
        self.free_by_size
            .iter()
            .flat_map(|(&size, queue)| queue.iter().map(move |&id| (size, id)))
    }

    /// Bytes currently cached in this arena.
    pub fn free_bytes(&self) -> usize {
        self.free_bytes
    }
}
