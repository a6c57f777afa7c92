//! Unified error handling for memforge
//!
//! All fallible pool operations return [`PoolResult`]. The taxonomy separates
//! memory exhaustion (recoverable by the caller after releasing blocks) from
//! device failures (not retried) and from caller programming errors.

use thiserror::Error;

/// Errors surfaced by the pool and its backends.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The backend allocator failed with memory exhaustion and the
    /// retry-after-sweep also failed. The caller may retry after releasing
    /// more blocks; the pool itself will not retry further.
    #[error("out of device memory: requested {requested} bytes on device {device_id}")]
    OutOfMemory { requested: usize, device_id: u32 },

    /// The backend allocator failed for a reason other than memory
    /// exhaustion (driver error, invalid device). Never retried.
    #[error("device allocator failure: {0}")]
    DeviceAllocatorFailure(String),

    /// `release` was called on a block that is not currently in-use or is
    /// not known to the pool. A programming error in the caller, not a
    /// recoverable condition.
    #[error("invalid release: {0}")]
    InvalidRelease(String),

    /// Allocation request of zero bytes, or one that overflows when rounded
    /// up to the alignment unit.
    #[error("invalid allocation size: {0} bytes")]
    InvalidAllocationSize(usize),

    /// Rejected pool configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Coarse error category, used for logging and for callers that only care
/// whether a failure is actionable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Memory pressure; actionable by releasing blocks or sweeping.
    Resource,
    /// Backend/driver failure.
    Backend,
    /// Caller programming error.
    User,
    /// Configuration error.
    Config,
}

impl PoolError {
    /// Categorize this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            PoolError::OutOfMemory { .. } => ErrorCategory::Resource,
            PoolError::DeviceAllocatorFailure(_) => ErrorCategory::Backend,
            PoolError::InvalidRelease(_) | PoolError::InvalidAllocationSize(_) => {
                ErrorCategory::User
            }
            PoolError::InvalidConfiguration(_) => ErrorCategory::Config,
        }
    }

    /// True for memory-exhaustion failures, which are the only failures the
    /// pool answers with an eviction sweep and a single retry.
    pub fn is_oom(&self) -> bool {
        matches!(self, PoolError::OutOfMemory { .. })
    }
}

pub type PoolResult<T> = Result<T, PoolError>;
