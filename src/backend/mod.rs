//! Device allocator backends
//!
//! The pool never talks to a concrete runtime directly. It depends on the
//! [`DeviceAllocator`] capability, implemented per backend: HIP for real AMD
//! GPUs (feature `rocm`), and a host-memory [`system::SystemAllocator`] for
//! CI and CPU-only environments.

use std::fmt;

use crate::error::PoolResult;

#[cfg(feature = "rocm")]
pub mod hip;
pub mod system;

pub use system::SystemAllocator;

#[cfg(feature = "rocm")]
pub use hip::HipAllocator;

/// Opaque device (or pinned host) pointer.
///
/// Stored as a raw address so block handles stay `Send + Sync`; only the
/// backend that produced it may dereference or free it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DevicePtr(u64);

impl DevicePtr {
    pub const NULL: DevicePtr = DevicePtr(0);

    pub fn new(addr: u64) -> Self {
        DevicePtr(addr)
    }

    pub fn as_raw(&self) -> u64 {
        self.0
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Opaque execution stream handle.
///
/// Blocks carry `Option<StreamId>`; `None` means the default (null) stream.
/// The pool never reuses a block across streams, so a handle only needs
/// identity, not dereferenceability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(pub u64);

/// Raw allocation capability implemented per backend.
///
/// All methods are inherently blocking (device memory management is
/// synchronous); the pool holds its own lock across these calls.
pub trait DeviceAllocator: Send + Sync {
    /// Allocate `size` bytes of device memory on `device_id`.
    ///
    /// Memory-exhaustion failures must map to [`PoolError::OutOfMemory`]
    /// so the pool can run its eviction sweep; any other failure maps to
    /// [`PoolError::DeviceAllocatorFailure`] and is never retried.
    ///
    /// [`PoolError::OutOfMemory`]: crate::error::PoolError::OutOfMemory
    /// [`PoolError::DeviceAllocatorFailure`]: crate::error::PoolError::DeviceAllocatorFailure
    fn allocate_raw(&self, device_id: u32, size: usize) -> PoolResult<DevicePtr>;

    /// Return `size` bytes at `ptr` to the device allocator.
    fn free_raw(&self, device_id: u32, ptr: DevicePtr, size: usize) -> PoolResult<()>;

    /// Allocate `size` bytes of pinned (non-pageable) host memory.
    fn allocate_pinned_raw(&self, size: usize) -> PoolResult<DevicePtr>;

    /// Return pinned host memory to the allocator.
    fn free_pinned_raw(&self, ptr: DevicePtr, size: usize) -> PoolResult<()>;

    /// Barrier: wait until no in-flight work on `device_id` can still
    /// reference memory the pool is about to hand back to the allocator.
    fn synchronize_device(&self, device_id: u32) -> PoolResult<()>;
}
