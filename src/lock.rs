//! Distributed lock handle.

use crate::engine::EngineSemaphore;
use crate::Bridge;
use std::sync::Arc;

/// A held cluster-wide lock, backed by a named engine semaphore.
///
/// Obtained from
/// [`ClusterManager::lock_with_timeout`](crate::ClusterManager::lock_with_timeout).
/// Dropping the handle without calling [`release`](DistributedLock::release)
/// leaks the permit; other members will never acquire the lock.
pub struct DistributedLock {
    semaphore: Arc<dyn EngineSemaphore>,
    bridge: Bridge,
    name: String,
}

impl DistributedLock {
    pub(crate) fn new(semaphore: Arc<dyn EngineSemaphore>, bridge: Bridge, name: String) -> Self {
        Self {
            semaphore,
            bridge,
            name,
        }
    }

    /// Name the lock was acquired under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Release the lock.
    ///
    /// Releasing the underlying semaphore is a blocking engine call, so it is
    /// dispatched detached: this method returns immediately and the permit is
    /// not necessarily free the instant it does. Callers must not assume
    /// another member can acquire the lock synchronously after release.
    pub fn release(self) {
        let semaphore = self.semaphore;
        self.bridge
            .dispatch_detached("lock release", move || semaphore.release());
    }
}
