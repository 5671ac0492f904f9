//! Expiry Sweep Task
//!
//! Background task that periodically drops expired entries from every
//! registered store. Reads already ignore expired entries; the sweep only
//! bounds memory held by entries nobody asks for again.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::CacheRegistry;

/// Spawns a background task that purges expired entries at a fixed interval.
///
/// # Arguments
/// * `registry` - Stores to sweep
/// * `cleanup_interval_secs` - Interval in seconds between sweeps
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during graceful shutdown.
///
/// # Example
/// ```ignore
/// let registry = CacheRegistry::with_default_memory_store();
/// let cleanup_handle = spawn_cleanup_task(registry.clone(), 60);
/// // Later, during shutdown:
/// cleanup_handle.abort();
/// ```
pub fn spawn_cleanup_task(registry: CacheRegistry, cleanup_interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(cleanup_interval_secs.max(1));

    tokio::spawn(async move {
        info!(
            "Starting expiry sweep with interval of {} seconds",
            interval.as_secs()
        );

        loop {
            tokio::time::sleep(interval).await;

            for (name, store) in registry.iter() {
                let removed = store.purge_expired();
                if removed > 0 {
                    info!(cache = name, "Expiry sweep: removed {} expired entries", removed);
                } else {
                    debug!(cache = name, "Expiry sweep: no expired entries found");
                }
            }
        }
    })
}
