//! memforge - Stream-aware GPU device-memory pool
//!
//! Device allocation calls are slow and can synchronize the whole device.
//! memforge amortizes that cost: it intercepts allocate/release, caches
//! freed blocks in per-(device, stream) free lists keyed by size class, and
//! only talks to the driver on a miss or an explicit sweep. A pinned
//! host-memory mirror covers the transfer-staging side.
//!
//! The pool depends on the [`backend::DeviceAllocator`] capability, never on
//! a concrete runtime: HIP on ROCm builds (`rocm` feature), host memory
//! everywhere else.
//!
//! ```
//! use std::sync::Arc;
//! use memforge::{Pool, backend::SystemAllocator};
//!
//! let pool = Pool::new(Arc::new(SystemAllocator::new()))?;
//! let block = pool.allocate(0, None, 4096)?;
//! pool.release(block)?;
//! // The block stays pooled; the next 4 KiB request reuses it.
//! assert_eq!(pool.total_bytes(None), 4096);
//! # Ok::<(), memforge::PoolError>(())
//! ```

pub mod arena;
pub mod backend;
pub mod block;
pub mod config;
pub mod error;
pub mod global;
pub mod logging;
pub mod pinned;
pub mod pool;

pub use arena::Arena;
pub use backend::{DeviceAllocator, DevicePtr, StreamId};
pub use block::{Block, BlockId, BlockState};
pub use config::{EvictionPolicy, PoolConfig};
pub use error::{ErrorCategory, PoolError, PoolResult};
pub use global::{default_pool, init_default_pool};
pub use logging::init_logging_default;
pub use pinned::PinnedPool;
pub use pool::{Pool, ScopedAlloc};
