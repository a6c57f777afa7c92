//! Process-wide default pool
//!
//! The surrounding numeric library wants one shared pool per process. That
//! global is modeled explicitly: the host application constructs a [`Pool`],
//! installs it once, and everything else reaches it through a thread-safe
//! accessor. There is no implicit construction.

use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::error::{PoolError, PoolResult};
use crate::pool::Pool;

static DEFAULT_POOL: OnceCell<Arc<Pool>> = OnceCell::new();

/// Install `pool` as the process-wide default. May be called once; a second
/// call fails and leaves the first pool in place.
pub fn init_default_pool(pool: Pool) -> PoolResult<Arc<Pool>> {
    let pool = Arc::new(pool);
    DEFAULT_POOL
        .set(pool.clone())
        .map_err(|_| PoolError::InvalidConfiguration("default pool already initialized".into()))?;
    tracing::info!("default memory pool installed");
    Ok(pool)
}

/// The installed default pool, if any.
pub fn default_pool() -> Option<Arc<Pool>> {
    DEFAULT_POOL.get().cloned()
}
