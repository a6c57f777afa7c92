//! Host-memory allocator backend
//!
//! Stands in for a GPU runtime when none is present: CI, unit tests, and
//! CPU-only fallback paths. Allocations come from `std::alloc` at the pool's
//! alignment, and live allocation counters make leak assertions cheap in
//! tests.

use std::alloc::{alloc, dealloc, Layout};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::backend::{DeviceAllocator, DevicePtr};
use crate::error::{PoolError, PoolResult};

/// `std::alloc`-backed [`DeviceAllocator`].
///
/// "Device" and "pinned" memory are both plain host memory here; the
/// distinction only matters for real runtimes. Thread-safe: counters are
/// atomic and `std::alloc` is internally synchronized.
#[derive(Debug)]
pub struct SystemAllocator {
    alignment: usize,
    live_allocations: AtomicUsize,
    live_bytes: AtomicUsize,
}

impl SystemAllocator {
    /// Default allocation alignment, matching the pool's default rounding
    /// unit.
    pub const DEFAULT_ALIGNMENT: usize = 512;

    pub fn new() -> Self {
        Self::with_alignment(Self::DEFAULT_ALIGNMENT)
    }

    /// Create an allocator producing blocks aligned to `alignment` bytes.
    /// `alignment` must be a power of two.
    pub fn with_alignment(alignment: usize) -> Self {
        assert!(
            alignment.is_power_of_two(),
            "alignment must be a power of two, got {}",
            alignment
        );
        SystemAllocator {
            alignment,
            live_allocations: AtomicUsize::new(0),
            live_bytes: AtomicUsize::new(0),
        }
    }

    /// Number of allocations handed out and not yet freed.
    pub fn live_allocations(&self) -> usize {
        self.live_allocations.load(Ordering::SeqCst)
    }

    /// Bytes handed out and not yet freed.
    pub fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::SeqCst)
    }

    fn layout(&self, size: usize) -> PoolResult<Layout> {
        Layout::from_size_align(size, self.alignment)
            .map_err(|e| PoolError::DeviceAllocatorFailure(format!("bad layout: {}", e)))
    }

    fn alloc_impl(&self, size: usize) -> PoolResult<DevicePtr> {
        let layout = self.layout(size)?;
        // SAFETY: layout has non-zero size (the pool rejects zero-size
        // requests before reaching the backend).
        let ptr = unsafe { alloc(layout) };
        if ptr.is_null() {
            return Err(PoolError::OutOfMemory {
                requested: size,
                device_id: 0,
            });
        }
        self.live_allocations.fetch_add(1, Ordering::SeqCst);
        self.live_bytes.fetch_add(size, Ordering::SeqCst);
        Ok(DevicePtr::new(ptr as u64))
    }

    fn free_impl(&self, ptr: DevicePtr, size: usize) -> PoolResult<()> {
        if ptr.is_null() {
            return Err(PoolError::DeviceAllocatorFailure(
                "free of null pointer".to_string(),
            ));
        }
        let layout = self.layout(size)?;
        // SAFETY: ptr was produced by alloc_impl with the same size and
        // alignment; the pool frees each registration exactly once.
        unsafe { dealloc(ptr.as_raw() as *mut u8, layout) };
        self.live_allocations.fetch_sub(1, Ordering::SeqCst);
        self.live_bytes.fetch_sub(size, Ordering::SeqCst);
        Ok(())
    }
}

impl Default for SystemAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceAllocator for SystemAllocator {
    fn allocate_raw(&self, _device_id: u32, size: usize) -> PoolResult<DevicePtr> {
        self.alloc_impl(size)
    }

    fn free_raw(&self, _device_id: u32, ptr: DevicePtr, size: usize) -> PoolResult<()> {
        self.free_impl(ptr, size)
    }

    fn allocate_pinned_raw(&self, size: usize) -> PoolResult<DevicePtr> {
        self.alloc_impl(size)
    }

    fn free_pinned_raw(&self, ptr: DevicePtr, size: usize) -> PoolResult<()> {
        self.free_impl(ptr, size)
    }

    fn synchronize_device(&self, _device_id: u32) -> PoolResult<()> {
        // Host memory has no in-flight device work to wait for.
        Ok(())
    }
}
