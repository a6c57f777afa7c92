//! Pinned host-memory pool
//!
//! Host-side mirror of [`Pool`] for pinned (non-pageable) memory, used for
//! fast host-device transfers. Pinned memory is not stream-affine and lives
//! on the host, so there is no stream or device dimension: one arena, same
//! size-class and sweep discipline.

use std::sync::Arc;

use crate::backend::DeviceAllocator;
use crate::block::Block;
use crate::config::PoolConfig;
use crate::error::{PoolError, PoolResult};
use crate::pool::{MemoryKind, Pool, ScopedAlloc};

/// Pinned host memory registers under a single placeholder device index.
const HOST_DEVICE: u32 = 0;

/// Pool of pinned host memory.
pub struct PinnedPool {
    pool: Pool,
}

impl std::fmt::Debug for PinnedPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinnedPool").finish_non_exhaustive()
    }
}

impl PinnedPool {
    pub fn new(backend: Arc<dyn DeviceAllocator>) -> PoolResult<Self> {
        Self::with_config(backend, PoolConfig::default())
    }

    /// Create a pinned pool with an explicit configuration.
    ///
    /// Fails with [`PoolError::InvalidConfiguration`] when the mirror is
    /// switched off via `enable_pinned_pool`; a disabled mirror must never
    /// reach the backend.
    pub fn with_config(backend: Arc<dyn DeviceAllocator>, config: PoolConfig) -> PoolResult<Self> {
        if !config.enable_pinned_pool {
            return Err(PoolError::InvalidConfiguration(
                "pinned pool is disabled (enable_pinned_pool = false)".to_string(),
            ));
        }
        let pool = Pool::with_kind(backend, config, MemoryKind::Pinned)?;
        Ok(PinnedPool { pool })
    }

    /// Allocate at least `size` bytes of pinned host memory, reusing a
    /// cached block when one of sufficient size is free.
    pub fn allocate(&self, size: usize) -> PoolResult<Block> {
        self.pool.allocate(HOST_DEVICE, None, size)
    }

    /// Return a block to the free list without unpinning it.
    pub fn release(&self, block: Block) -> PoolResult<()> {
        self.pool.release(block)
    }

    /// Return all free pinned blocks to the host allocator.
    pub fn free_unused_blocks(&self) -> PoolResult<usize> {
        self.pool.free_unused_blocks(Some(HOST_DEVICE))
    }

    pub fn used_bytes(&self) -> usize {
        self.pool.used_bytes(None)
    }

    pub fn total_bytes(&self) -> usize {
        self.pool.total_bytes(None)
    }

    pub fn free_bytes(&self) -> usize {
        self.pool.free_bytes(None)
    }

    /// Allocate with release guaranteed on every exit path.
    pub fn allocate_scoped(&self, size: usize) -> PoolResult<ScopedAlloc<'_>> {
        self.pool.allocate_scoped(HOST_DEVICE, None, size)
    }
}
