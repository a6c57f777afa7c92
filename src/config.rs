//! Pool configuration

use serde::{Deserialize, Serialize};

use crate::error::{PoolError, PoolResult};

/// Order in which free blocks are returned to the device allocator during a
/// sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EvictionPolicy {
    /// Largest blocks first. Frees the most bytes earliest, which is what a
    /// pressure sweep wants.
    #[default]
    LargestFirst,
    /// Blocks that have sat free the longest first.
    LeastRecentlyUsed,
}

/// Pool configuration.
///
/// # Example
///
/// ```
/// use memforge::PoolConfig;
///
/// let config = PoolConfig::new()
///     .with_alignment_bytes(1024)
///     .with_pinned_pool(false);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Minimum allocation unit; every block size is rounded up to a multiple
    /// of this. Must be a power of two.
    pub alignment_bytes: usize,
    /// Sweep ordering for `free_unused_blocks` and pressure eviction.
    pub eviction_policy: EvictionPolicy,
    /// Whether the host-side pinned-memory mirror should be active.
    pub enable_pinned_pool: bool,
}

impl PoolConfig {
    /// Default rounding unit for block sizes.
    pub const DEFAULT_ALIGNMENT: usize = 512;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_alignment_bytes(mut self, alignment_bytes: usize) -> Self {
        self.alignment_bytes = alignment_bytes;
        self
    }

    pub fn with_eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = policy;
        self
    }

    pub fn with_pinned_pool(mut self, enabled: bool) -> Self {
        self.enable_pinned_pool = enabled;
        self
    }

    /// Reject configurations the pool cannot honor.
    pub fn validate(&self) -> PoolResult<()> {
        if self.alignment_bytes == 0 || !self.alignment_bytes.is_power_of_two() {
            return Err(PoolError::InvalidConfiguration(format!(
                "alignment_bytes must be a power of two, got {}",
                self.alignment_bytes
            )));
        }
        Ok(())
    }

    /// Round `size` up to the next multiple of the alignment unit.
    /// Returns `None` on overflow.
    pub fn round_up(&self, size: usize) -> Option<usize> {
        let mask = self.alignment_bytes - 1;
        size.checked_add(mask).map(|padded| padded & !mask)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            alignment_bytes: Self::DEFAULT_ALIGNMENT,
            eviction_policy: EvictionPolicy::default(),
            enable_pinned_pool: true,
        }
    }
}
