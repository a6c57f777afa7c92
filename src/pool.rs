//! Device-memory pool
//!
//! The pool fronts a raw [`DeviceAllocator`] and caches released blocks in
//! per-(device, stream) arenas instead of returning them to the driver.
//! Fresh device allocation is slow and can synchronize the whole device, so
//! the fast path is a free-list hit; the driver is only touched on a miss or
//! during an explicit sweep.
//!
//! All mutable state sits behind one coarse mutex. Allocation and release
//! are rare relative to the compute they feed, so lock contention is not a
//! concern; `allocate` blocks only on the lock and, on miss, on the backend
//! call itself, never on other threads' device work.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::arena::Arena;
use crate::backend::{DeviceAllocator, DevicePtr, StreamId};
use crate::block::{Block, BlockId, BlockState};
use crate::config::{EvictionPolicy, PoolConfig};
use crate::error::{PoolError, PoolResult};

/// Which raw allocation entry points the pool drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MemoryKind {
    /// Device memory: per-device arenas, device sync before sweeps.
    Device,
    /// Pinned host memory: one arena, no device sync on sweep.
    Pinned,
}

type ArenaKey = (u32, Option<StreamId>);

/// Block ids are process-unique, not per-pool, so a block released into the
/// wrong pool is always caught as unknown instead of colliding with a
/// resident id.
static NEXT_BLOCK_ID: AtomicU64 = AtomicU64::new(1);

/// Registry entry for one backing memory region. The registry, not the
/// caller-held [`Block`] handle, is the source of truth for state.
#[derive(Debug)]
struct Region {
    ptr: DevicePtr,
    size: usize,
    device_id: u32,
    stream_id: Option<StreamId>,
    state: BlockState,
    /// Ordinal of the most recent release, for least-recently-used sweeps.
    free_epoch: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct DeviceCounters {
    used: usize,
    total: usize,
}

#[derive(Debug)]
struct PoolInner {
    arenas: HashMap<ArenaKey, Arena>,
    regions: HashMap<BlockId, Region>,
    per_device: HashMap<u32, DeviceCounters>,
    total_allocated: usize,
    total_used: usize,
    next_epoch: u64,
}

impl PoolInner {
    fn new() -> Self {
        PoolInner {
            arenas: HashMap::new(),
            regions: HashMap::new(),
            per_device: HashMap::new(),
            total_allocated: 0,
            total_used: 0,
            next_epoch: 0,
        }
    }
}

/// Pooled allocator for device memory.
///
/// Invariant after every operation: `used_bytes() <= total_bytes()`, and the
/// difference is exactly the bytes cached in free lists.
pub struct Pool {
    backend: Arc<dyn DeviceAllocator>,
    config: PoolConfig,
    kind: MemoryKind,
    inner: Mutex<PoolInner>,
}

impl Pool {
    /// Create a device-memory pool over `backend` with the default
    /// configuration.
    pub fn new(backend: Arc<dyn DeviceAllocator>) -> PoolResult<Self> {
        Self::with_config(backend, PoolConfig::default())
    }

    /// Create a device-memory pool with an explicit configuration.
    pub fn with_config(backend: Arc<dyn DeviceAllocator>, config: PoolConfig) -> PoolResult<Self> {
        Self::with_kind(backend, config, MemoryKind::Device)
    }

    pub(crate) fn with_kind(
        backend: Arc<dyn DeviceAllocator>,
        config: PoolConfig,
        kind: MemoryKind,
    ) -> PoolResult<Self> {
        config.validate()?;
        Ok(Pool {
            backend,
            config,
            kind,
            inner: Mutex::new(PoolInner::new()),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        // Bookkeeping is in an unknown state after a panic under the lock.
        self.inner.lock().expect("pool mutex poisoned")
    }

    /// Allocate at least `size` bytes on `device_id` for `stream_id`.
    ///
    /// The returned block's size is `size` rounded up to the configured
    /// alignment unit. A free block of sufficient size in the matching
    /// arena is reused without touching the device allocator; otherwise
    /// fresh memory is requested for exactly the rounded size.
    ///
    /// On a backend out-of-memory failure, all free blocks for the device
    /// are swept back to the allocator and the allocation is retried exactly
    /// once before [`PoolError::OutOfMemory`] is surfaced. Non-OOM backend
    /// failures are never retried.
    pub fn allocate(
        &self,
        device_id: u32,
        stream_id: Option<StreamId>,
        size: usize,
    ) -> PoolResult<Block> {
        if size == 0 {
            return Err(PoolError::InvalidAllocationSize(0));
        }
        let rounded = self
            .config
            .round_up(size)
            .ok_or(PoolError::InvalidAllocationSize(size))?;

        let mut inner = self.lock();
        let key = (device_id, stream_id);
        let arena = inner.arenas.entry(key).or_insert_with(Arena::new);

        if let Some((class, id)) = arena.take_best_fit(rounded) {
            let region = inner
                .regions
                .get_mut(&id)
                .ok_or_else(|| PoolError::InvalidRelease(format!("{} in free list but not registered", id)))?;
            region.state = BlockState::InUse;
            inner.total_used += class;
            inner.per_device.entry(device_id).or_default().used += class;
            tracing::trace!(
                requested = size,
                class,
                device_id,
                "pool hit: reusing cached block"
            );
            let region = &inner.regions[&id];
            return Ok(Block {
                id,
                device_id,
                stream_id,
                size: class,
                ptr: region.ptr,
            });
        }

        tracing::debug!(
            requested = size,
            rounded,
            device_id,
            "pool miss: requesting fresh memory from device allocator"
        );
        let ptr = match self.raw_alloc(device_id, rounded) {
            Ok(ptr) => ptr,
            Err(err) if err.is_oom() => {
                tracing::warn!(
                    requested = rounded,
                    device_id,
                    "device allocator out of memory, sweeping free blocks and retrying once"
                );
                let (freed, sweep_err) = self.sweep_device_locked(&mut inner, device_id);
                if let Some(e) = sweep_err {
                    tracing::error!(error = %e, "pressure sweep partially failed");
                }
                tracing::debug!(freed, device_id, "pressure sweep complete, retrying");
                self.raw_alloc(device_id, rounded)
                    .map_err(|retry_err| match retry_err {
                        PoolError::OutOfMemory { .. } => PoolError::OutOfMemory {
                            requested: rounded,
                            device_id,
                        },
                        other => other,
                    })?
            }
            Err(err) => return Err(err),
        };

        let id = BlockId(NEXT_BLOCK_ID.fetch_add(1, Ordering::Relaxed));
        inner.regions.insert(
            id,
            Region {
                ptr,
                size: rounded,
                device_id,
                stream_id,
                state: BlockState::InUse,
                free_epoch: 0,
            },
        );
        inner.total_allocated += rounded;
        inner.total_used += rounded;
        let counters = inner.per_device.entry(device_id).or_default();
        counters.total += rounded;
        counters.used += rounded;

        Ok(Block {
            id,
            device_id,
            stream_id,
            size: rounded,
            ptr,
        })
    }

    /// Return `block` to its arena's free list. The memory stays pooled for
    /// reuse; nothing is handed back to the device allocator.
    ///
    /// Fails with [`PoolError::InvalidRelease`] if the block is not
    /// currently in-use or is unknown to this pool. Callers must treat that
    /// as a fatal programming error, not a recoverable condition.
    pub fn release(&self, block: Block) -> PoolResult<()> {
        let mut inner = self.lock();
        let epoch = inner.next_epoch;

        let (size, device_id, stream_id) = {
            let region = inner.regions.get_mut(&block.id).ok_or_else(|| {
                PoolError::InvalidRelease(format!(
                    "{} is not registered with this pool (already swept, or foreign block)",
                    block.id
                ))
            })?;
            if region.state != BlockState::InUse {
                return Err(PoolError::InvalidRelease(format!(
                    "{} is already free (double release)",
                    block.id
                )));
            }
            region.state = BlockState::Free;
            region.free_epoch = epoch;
            (region.size, region.device_id, region.stream_id)
        };
        inner.next_epoch += 1;

        inner.total_used -= size;
        inner.per_device.entry(device_id).or_default().used -= size;
        inner
            .arenas
            .entry((device_id, stream_id))
            .or_insert_with(Arena::new)
            .insert(size, block.id);
        tracing::trace!(size, device_id, "block released back to pool");
        Ok(())
    }

    /// Synchronously return all free blocks to the device allocator, for one
    /// device or for every device. In-use blocks are never touched.
    ///
    /// Returns the number of bytes handed back. If the backend refuses to
    /// free a block, that block stays tracked as free for a later retry, the
    /// remaining blocks are still attempted, and the first error is
    /// surfaced.
    pub fn free_unused_blocks(&self, device_id: Option<u32>) -> PoolResult<usize> {
        let mut inner = self.lock();
        let devices: Vec<u32> = match device_id {
            Some(d) => vec![d],
            None => {
                let mut ds: Vec<u32> = inner.arenas.keys().map(|&(d, _)| d).collect();
                ds.sort_unstable();
                ds.dedup();
                ds
            }
        };

        let mut freed = 0usize;
        let mut first_err = None;
        for device in devices {
            let (bytes, err) = self.sweep_device_locked(&mut inner, device);
            freed += bytes;
            if first_err.is_none() {
                first_err = err;
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => {
                tracing::debug!(freed, "free_unused_blocks complete");
                Ok(freed)
            }
        }
    }

    /// Bytes currently handed out to callers, for one device or overall.
    pub fn used_bytes(&self, device_id: Option<u32>) -> usize {
        let inner = self.lock();
        match device_id {
            Some(d) => inner.per_device.get(&d).map_or(0, |c| c.used),
            None => inner.total_used,
        }
    }

    /// Bytes acquired from the device allocator and not yet returned, for
    /// one device or overall. Always >= `used_bytes`; the difference is the
    /// bytes cached in free lists.
    pub fn total_bytes(&self, device_id: Option<u32>) -> usize {
        let inner = self.lock();
        match device_id {
            Some(d) => inner.per_device.get(&d).map_or(0, |c| c.total),
            None => inner.total_allocated,
        }
    }

    /// Bytes cached in free lists (`total_bytes - used_bytes`).
    pub fn free_bytes(&self, device_id: Option<u32>) -> usize {
        let inner = self.lock();
        match device_id {
            Some(d) => {
                let c = inner.per_device.get(&d).copied().unwrap_or_default();
                c.total - c.used
            }
            None => inner.total_allocated - inner.total_used,
        }
    }

    /// Allocate with a guard that releases the block on every exit path of
    /// the enclosing scope, including panics.
    pub fn allocate_scoped(
        &self,
        device_id: u32,
        stream_id: Option<StreamId>,
        size: usize,
    ) -> PoolResult<ScopedAlloc<'_>> {
        let block = self.allocate(device_id, stream_id, size)?;
        Ok(ScopedAlloc {
            pool: self,
            block: Some(block),
        })
    }

    fn raw_alloc(&self, device_id: u32, size: usize) -> PoolResult<DevicePtr> {
        match self.kind {
            MemoryKind::Device => self.backend.allocate_raw(device_id, size),
            MemoryKind::Pinned => self.backend.allocate_pinned_raw(size),
        }
    }

    fn raw_free(&self, device_id: u32, ptr: DevicePtr, size: usize) -> PoolResult<()> {
        match self.kind {
            MemoryKind::Device => self.backend.free_raw(device_id, ptr, size),
            MemoryKind::Pinned => self.backend.free_pinned_raw(ptr, size),
        }
    }

    /// Sweep every free block of `device_id` back to the device allocator,
    /// in eviction-policy order. Caller holds the pool lock.
    ///
    /// Returns bytes freed plus the first error encountered. A block whose
    /// backend free fails is reinserted into its free list, so bookkeeping
    /// stays consistent and the free can be retried later.
    fn sweep_device_locked(
        &self,
        inner: &mut PoolInner,
        device_id: u32,
    ) -> (usize, Option<PoolError>) {
        // No in-flight device work may still reference memory we are about
        // to hand back. Pinned host memory needs no such barrier.
        if self.kind == MemoryKind::Device {
            if let Err(err) = self.backend.synchronize_device(device_id) {
                tracing::error!(device_id, error = %err, "device sync before sweep failed");
                return (0, Some(err));
            }
        }

        // (size, free_epoch, id, arena key) for every free block on the device.
        let mut victims: Vec<(usize, u64, BlockId, ArenaKey)> = Vec::new();
        for (&key, arena) in inner.arenas.iter().filter(|(key, _)| key.0 == device_id) {
            for (size, id) in arena.free_blocks() {
                let epoch = inner.regions.get(&id).map_or(0, |r| r.free_epoch);
                victims.push((size, epoch, id, key));
            }
        }
        match self.config.eviction_policy {
            EvictionPolicy::LargestFirst => {
                victims.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)))
            }
            EvictionPolicy::LeastRecentlyUsed => victims.sort_by_key(|v| v.1),
        }

        let mut freed = 0usize;
        let mut first_err = None;
        for (size, _epoch, id, key) in victims {
            let Some(arena) = inner.arenas.get_mut(&key) else {
                continue;
            };
            if !arena.remove(size, id) {
                continue;
            }
            let Some(region) = inner.regions.get(&id) else {
                continue;
            };
            let ptr = region.ptr;
            match self.raw_free(device_id, ptr, size) {
                Ok(()) => {
                    inner.regions.remove(&id);
                    inner.total_allocated -= size;
                    inner.per_device.entry(device_id).or_default().total -= size;
                    freed += size;
                    tracing::trace!(size, device_id, "swept block back to device allocator");
                }
                Err(err) => {
                    // Keep the block tracked as free for a later retry.
                    tracing::error!(size, device_id, error = %err, "sweep free failed");
                    if let Some(arena) = inner.arenas.get_mut(&key) {
                        arena.insert(size, id);
                    }
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                }
            }
        }
        (freed, first_err)
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        // Teardown: everything goes back to the device allocator, in-use
        // registrations included. Failures are logged; Drop cannot surface
        // them.
        let Ok(mut inner) = self.inner.lock() else {
            tracing::error!("pool mutex poisoned at teardown, leaking device memory");
            return;
        };
        if self.kind == MemoryKind::Device {
            let mut devices: Vec<u32> = inner.regions.values().map(|r| r.device_id).collect();
            devices.sort_unstable();
            devices.dedup();
            for device in devices {
                if let Err(err) = self.backend.synchronize_device(device) {
                    tracing::error!(device, error = %err, "device sync at teardown failed");
                }
            }
        }
        for (id, region) in inner.regions.drain() {
            if region.state == BlockState::InUse {
                tracing::warn!(%id, size = region.size, "block still in use at pool teardown");
            }
            if let Err(err) = self.raw_free(region.device_id, region.ptr, region.size) {
                tracing::error!(%id, error = %err, "failed to free block at pool teardown");
            }
        }
        inner.arenas.clear();
        inner.per_device.clear();
        inner.total_allocated = 0;
        inner.total_used = 0;
    }
}

/// RAII guard returned by [`Pool::allocate_scoped`].
///
/// Releases the block when dropped, on every exit path of the enclosing
/// scope. A failing release inside `drop` is logged at error level since
/// `Drop` cannot propagate it.
pub struct ScopedAlloc<'a> {
    pool: &'a Pool,
    block: Option<Block>,
}

impl ScopedAlloc<'_> {
    pub fn block(&self) -> &Block {
        // Some until drop or into_block, and into_block consumes self.
        match &self.block {
            Some(block) => block,
            None => unreachable!("scoped allocation accessed after consumption"),
        }
    }

    /// Detach the block from the guard; the caller becomes responsible for
    /// releasing it.
    pub fn into_block(mut self) -> Block {
        match self.block.take() {
            Some(block) => block,
            None => unreachable!("scoped allocation consumed twice"),
        }
    }
}

impl std::ops::Deref for ScopedAlloc<'_> {
    type Target = Block;

    fn deref(&self) -> &Block {
        self.block()
    }
}

impl Drop for ScopedAlloc<'_> {
    fn drop(&mut self) {
        if let Some(block) = self.block.take() {
            if let Err(err) = self.pool.release(block) {
                tracing::error!(error = %err, "scoped release failed");
            }
        }
    }
}
