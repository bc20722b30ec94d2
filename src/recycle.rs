use parking_lot::Mutex;
use std::sync::Arc;

use crate::releaser::Releaser;
use crate::semaphore::SemaphoreImpl;

/// A bounded free list of releasers.
///
/// Every acquisition on a previously inactive key needs a releaser, and hot
/// keys retire and reacquire theirs continuously; the pool turns that churn
/// into a pop and a field rewrite instead of an allocation. When the free
/// list is full, retired releasers are simply dropped.
pub(crate) struct ReleaserPool<K, S> {
    free: Mutex<Vec<Arc<Releaser<K, S>>>>,
    capacity: usize,
    permits: usize,
}

impl<K, S> ReleaserPool<K, S>
where
    S: SemaphoreImpl,
{
    /// A pool holding up to `capacity` spares, prefilled with `initial_fill`
    /// of them. Each spare's semaphore is created with `permits` permits.
    pub(crate) fn new(capacity: usize, initial_fill: usize, permits: usize) -> Self {
        let free = (0..initial_fill)
            .map(|_| Arc::new(Releaser::spare(permits)))
            .collect();
        Self {
            free: Mutex::new(free),
            capacity,
            permits,
        }
    }

    /// A releaser representing `key`, counting the caller as the one
    /// interested party: recycled from the free list if possible, freshly
    /// constructed otherwise.
    pub(crate) fn take(&self, key: K) -> Arc<Releaser<K, S>> {
        let recycled = self.free.lock().pop();
        match recycled {
            Some(releaser) => {
                releaser.recycle(key);
                releaser
            }
            None => Arc::new(Releaser::new(key, self.permits)),
        }
    }

    /// Return a retired releaser to the free list, or drop it if the list is
    /// full.
    pub(crate) fn put(&self, releaser: Arc<Releaser<K, S>>) {
        let mut free = self.free.lock();
        if free.len() < self.capacity {
            free.push(releaser);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.free.lock().len()
    }
}
