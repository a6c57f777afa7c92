//! Memory-pressure behavior: the sweep-then-retry-once contract, eviction
//! ordering, and failure propagation.

mod common;

use std::sync::Arc;

use common::{FailureMode, MockAllocator};
use memforge::{EvictionPolicy, Pool, PoolConfig, PoolError};

#[test]
fn oom_sweeps_exactly_once_then_fails() {
    let backend = Arc::new(MockAllocator::new());
    let pool = Pool::new(backend.clone()).unwrap();
    backend.set_mode(FailureMode::AlwaysOom);

    let err = pool.allocate(0, None, 4096).unwrap_err();
    assert!(matches!(err, PoolError::OutOfMemory { .. }));

    // One sweep (device sync) between exactly two allocation attempts, and
    // no further retries.
    assert_eq!(backend.sync_calls(), 1);
    assert_eq!(backend.alloc_calls(), 2);
    assert_eq!(pool.total_bytes(None), 0);
    assert_eq!(pool.used_bytes(None), 0);
}

#[test]
fn retry_after_sweep_can_succeed() {
    let backend = Arc::new(MockAllocator::new());
    let pool = Pool::new(backend.clone()).unwrap();

    // Stock the pool with a cached 8 KiB block.
    let cached = pool.allocate(0, None, 8192).unwrap();
    pool.release(cached).unwrap();
    assert_eq!(pool.free_bytes(None), 8192);

    // First fresh attempt fails with OOM; the sweep returns the cached
    // block to the backend and the single retry succeeds.
    backend.set_mode(FailureMode::OomTimes(1));
    let block = pool.allocate(0, None, 16384).unwrap();
    assert_eq!(block.size(), 16384);
    assert_eq!(backend.freed_sizes(), vec![8192]);
    assert_eq!(pool.free_bytes(None), 0);
    assert_eq!(pool.total_bytes(None), 16384);

    pool.release(block).unwrap();
}

#[test]
fn device_error_is_not_retried() {
    let backend = Arc::new(MockAllocator::new());
    let pool = Pool::new(backend.clone()).unwrap();
    backend.set_mode(FailureMode::DeviceError);

    let err = pool.allocate(0, None, 1024).unwrap_err();
    assert!(matches!(err, PoolError::DeviceAllocatorFailure(_)));

    // No sweep, no second attempt.
    assert_eq!(backend.sync_calls(), 0);
    assert_eq!(backend.alloc_calls(), 1);
}

#[test]
fn sweep_returns_largest_blocks_first() {
    let backend = Arc::new(MockAllocator::new());
    let pool = Pool::new(backend.clone()).unwrap();

    let small = pool.allocate(0, None, 512).unwrap();
    let large = pool.allocate(0, None, 2048).unwrap();
    let medium = pool.allocate(0, None, 1024).unwrap();
    pool.release(small).unwrap();
    pool.release(large).unwrap();
    pool.release(medium).unwrap();

    pool.free_unused_blocks(Some(0)).unwrap();
    assert_eq!(backend.freed_sizes(), vec![2048, 1024, 512]);
}

#[test]
fn lru_policy_sweeps_oldest_free_blocks_first() {
    let backend = Arc::new(MockAllocator::new());
    let config = PoolConfig::new().with_eviction_policy(EvictionPolicy::LeastRecentlyUsed);
    let pool = Pool::with_config(backend.clone(), config).unwrap();

    let a = pool.allocate(0, None, 2048).unwrap();
    let b = pool.allocate(0, None, 512).unwrap();
    let c = pool.allocate(0, None, 1024).unwrap();

    // Release order, not size, dictates the sweep order.
    pool.release(b).unwrap();
    pool.release(c).unwrap();
    pool.release(a).unwrap();

    pool.free_unused_blocks(Some(0)).unwrap();
    assert_eq!(backend.freed_sizes(), vec![512, 1024, 2048]);
}

#[test]
fn failed_sweep_free_keeps_block_tracked() {
    let backend = Arc::new(MockAllocator::new());
    let pool = Pool::new(backend.clone()).unwrap();

    let block = pool.allocate(0, None, 4096).unwrap();
    pool.release(block).unwrap();

    backend.set_fail_frees(true);
    let err = pool.free_unused_blocks(Some(0)).unwrap_err();
    assert!(matches!(err, PoolError::DeviceAllocatorFailure(_)));

    // The block must still be pooled and reusable after the failure.
    assert_eq!(pool.total_bytes(None), 4096);
    assert_eq!(pool.free_bytes(None), 4096);

    backend.set_fail_frees(false);
    let freed = pool.free_unused_blocks(Some(0)).unwrap();
    assert_eq!(freed, 4096);
    assert_eq!(pool.total_bytes(None), 0);
}

#[test]
fn sweep_on_empty_pool_is_a_no_op() {
    let backend = Arc::new(MockAllocator::new());
    let pool = Pool::new(backend.clone()).unwrap();

    assert_eq!(pool.free_unused_blocks(None).unwrap(), 0);
    assert_eq!(backend.free_calls(), 0);
}
