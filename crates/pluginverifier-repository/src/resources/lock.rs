use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Instant;

use super::repository::Inner;
use super::{Resource, ResourceKey, ResourceWeight};

/// A lock on a repository entry.
///
/// While at least one lock exists, the entry is neither evicted nor disposed. Dropping the lock
/// (or calling [`release`](Self::release)) gives it back; the ownership rules make sure this
/// happens exactly once.
pub struct ResourceLock<K, R, W>
where
    K: ResourceKey,
    R: Resource,
    W: ResourceWeight,
{
    key: K,
    resource: R,
    lock_time: Instant,
    repository: Arc<Inner<K, R, W>>,
}

impl<K, R, W> ResourceLock<K, R, W>
where
    K: ResourceKey,
    R: Resource,
    W: ResourceWeight,
{
    pub(super) fn new(key: K, resource: R, repository: Arc<Inner<K, R, W>>) -> Self {
        Self {
            key,
            resource,
            lock_time: Instant::now(),
            repository,
        }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn resource(&self) -> &R {
        &self.resource
    }

    /// When this lock was taken.
    pub fn lock_time(&self) -> Instant {
        self.lock_time
    }

    /// Gives the lock back to the repository.
    pub fn release(self) {
        drop(self)
    }
}

impl<K, R, W> Deref for ResourceLock<K, R, W>
where
    K: ResourceKey,
    R: Resource,
    W: ResourceWeight,
{
    type Target = R;

    fn deref(&self) -> &R {
        &self.resource
    }
}

impl<K, R, W> Drop for ResourceLock<K, R, W>
where
    K: ResourceKey,
    R: Resource,
    W: ResourceWeight,
{
    fn drop(&mut self) {
        self.repository.release(&self.key);
    }
}

impl<K, R, W> fmt::Debug for ResourceLock<K, R, W>
where
    K: ResourceKey,
    R: Resource + fmt::Debug,
    W: ResourceWeight,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceLock")
            .field("key", &self.key)
            .field("resource", &self.resource)
            .field("lock_time", &self.lock_time)
            .finish()
    }
}
