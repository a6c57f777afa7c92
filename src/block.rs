//! Block handles and lifecycle state
//!
//! A [`Block`] is the caller-facing handle for a pooled memory region. The
//! pool's internal registry is the source of truth for lifecycle state; the
//! handle only carries identity and placement. Lifecycle per region:
//! `Free -> InUse` (allocate hit or fresh allocation), `InUse -> Free`
//! (release), `Free -> released` (sweep, region leaves the registry). No
//! other transition is valid.

use std::fmt;

use crate::backend::{DevicePtr, StreamId};

/// Process-unique identity of a pooled memory region.
///
/// Stable across reuse: allocating, releasing, and re-allocating the same
/// region yields handles with the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub(crate) u64);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block#{}", self.0)
    }
}

/// Lifecycle state of a registered region. A region leaves the registry
/// entirely when swept, so there is no `Released` variant to observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    /// Cached in an arena free list, available for reuse.
    Free,
    /// Handed out to exactly one caller.
    InUse,
}

/// Handle for a pooled memory region.
///
/// Cloneable so callers can thread it through their own structures, but the
/// ownership contract is single-holder: exactly one logical owner between
/// `allocate` and `release`, and no use after `release`.
#[derive(Debug, Clone)]
pub struct Block {
    pub(crate) id: BlockId,
    pub(crate) device_id: u32,
    pub(crate) stream_id: Option<StreamId>,
    pub(crate) size: usize,
    pub(crate) ptr: DevicePtr,
}

impl Block {
    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    /// Stream this block is affine to; `None` is the default stream.
    pub fn stream_id(&self) -> Option<StreamId> {
        self.stream_id
    }

    /// Byte size of the region, already rounded up to the pool's alignment
    /// unit; always >= the requested size.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Base address of the region.
    pub fn ptr(&self) -> DevicePtr {
        self.ptr
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} bytes at {} on device {})",
            self.id, self.size, self.ptr, self.device_id
        )
    }
}
