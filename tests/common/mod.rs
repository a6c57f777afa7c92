//! Shared test backend
//!
//! A scriptable [`DeviceAllocator`] that hands out fake addresses, counts
//! every backend call, records the order blocks are freed in, and can be
//! told to fail in specific ways. Lets the tests observe exactly when the
//! pool touches the "device".

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use memforge::backend::{DeviceAllocator, DevicePtr};
use memforge::error::{PoolError, PoolResult};

/// How the mock answers the next allocation requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// All allocations succeed.
    None,
    /// Every allocation fails with out-of-memory.
    AlwaysOom,
    /// The next `n` allocations fail with out-of-memory, then succeed.
    OomTimes(usize),
    /// Every allocation fails with a non-OOM device error.
    DeviceError,
}

pub struct MockAllocator {
    mode: Mutex<FailureMode>,
    /// When set, `free_raw`/`free_pinned_raw` refuse to free.
    fail_frees: AtomicBool,
    next_addr: AtomicU64,
    alloc_calls: AtomicUsize,
    free_calls: AtomicUsize,
    sync_calls: AtomicUsize,
    live: Mutex<HashMap<u64, usize>>,
    /// Sizes in the order the pool freed them.
    freed_sizes: Mutex<Vec<usize>>,
}

impl MockAllocator {
    pub fn new() -> Self {
        MockAllocator {
            mode: Mutex::new(FailureMode::None),
            fail_frees: AtomicBool::new(false),
            next_addr: AtomicU64::new(0x1000),
            alloc_calls: AtomicUsize::new(0),
            free_calls: AtomicUsize::new(0),
            sync_calls: AtomicUsize::new(0),
            live: Mutex::new(HashMap::new()),
            freed_sizes: Mutex::new(Vec::new()),
        }
    }

    pub fn set_mode(&self, mode: FailureMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn set_fail_frees(&self, fail: bool) {
        self.fail_frees.store(fail, Ordering::SeqCst);
    }

    pub fn alloc_calls(&self) -> usize {
        self.alloc_calls.load(Ordering::SeqCst)
    }

    pub fn free_calls(&self) -> usize {
        self.free_calls.load(Ordering::SeqCst)
    }

    pub fn sync_calls(&self) -> usize {
        self.sync_calls.load(Ordering::SeqCst)
    }

    pub fn live_allocations(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    pub fn live_bytes(&self) -> usize {
        self.live.lock().unwrap().values().sum()
    }

    pub fn freed_sizes(&self) -> Vec<usize> {
        self.freed_sizes.lock().unwrap().clone()
    }

    fn alloc_impl(&self, device_id: u32, size: usize) -> PoolResult<DevicePtr> {
        self.alloc_calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut mode = self.mode.lock().unwrap();
            match *mode {
                FailureMode::None => {}
                FailureMode::AlwaysOom => {
                    return Err(PoolError::OutOfMemory {
                        requested: size,
                        device_id,
                    })
                }
                FailureMode::OomTimes(0) => {}
                FailureMode::OomTimes(n) => {
                    *mode = FailureMode::OomTimes(n - 1);
                    return Err(PoolError::OutOfMemory {
                        requested: size,
                        device_id,
                    });
                }
                FailureMode::DeviceError => {
                    return Err(PoolError::DeviceAllocatorFailure(
                        "injected device error".to_string(),
                    ))
                }
            }
        }
        let addr = self.next_addr.fetch_add(size as u64, Ordering::SeqCst);
        self.live.lock().unwrap().insert(addr, size);
        Ok(DevicePtr::new(addr))
    }

    fn free_impl(&self, ptr: DevicePtr, size: usize) -> PoolResult<()> {
        self.free_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_frees.load(Ordering::SeqCst) {
            return Err(PoolError::DeviceAllocatorFailure(
                "injected free failure".to_string(),
            ));
        }
        let removed = self.live.lock().unwrap().remove(&ptr.as_raw());
        match removed {
            Some(live_size) if live_size == size => {
                self.freed_sizes.lock().unwrap().push(size);
                Ok(())
            }
            Some(live_size) => Err(PoolError::DeviceAllocatorFailure(format!(
                "size mismatch on free: allocated {}, freed {}",
                live_size, size
            ))),
            None => Err(PoolError::DeviceAllocatorFailure(format!(
                "double or foreign free at {}",
                ptr
            ))),
        }
    }
}

impl DeviceAllocator for MockAllocator {
    fn allocate_raw(&self, device_id: u32, size: usize) -> PoolResult<DevicePtr> {
        self.alloc_impl(device_id, size)
    }

    fn free_raw(&self, _device_id: u32, ptr: DevicePtr, size: usize) -> PoolResult<()> {
        self.free_impl(ptr, size)
    }

    fn allocate_pinned_raw(&self, size: usize) -> PoolResult<DevicePtr> {
        self.alloc_impl(0, size)
    }

    fn free_pinned_raw(&self, ptr: DevicePtr, size: usize) -> PoolResult<()> {
        self.free_impl(ptr, size)
    }

    fn synchronize_device(&self, _device_id: u32) -> PoolResult<()> {
        self.sync_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
