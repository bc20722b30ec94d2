use std::fmt::{self, Debug};
use std::hash::{BuildHasher, Hash};
use std::ops::Deref;
use std::sync::Arc;

use crate::pool::SemaphorePoolImpl;
use crate::releaser::Releaser;
use crate::semaphore::SemaphoreImpl;

/// A RAII permit for one key of a [SemaphorePool](crate::SemaphorePool). When
/// this instance is dropped (falls out of scope), the permit is returned and,
/// if this was the last interested party, the key is removed from the pool.
#[must_use = "if unused the permit is returned immediately"]
pub struct Guard<K, S, H, P>
where
    K: Eq + Hash + Clone + Debug,
    S: SemaphoreImpl,
    H: BuildHasher + Clone,
    P: Deref<Target = SemaphorePoolImpl<K, S, H>>,
{
    pool: P,
    key: K,
    releaser: Option<Arc<Releaser<K, S>>>,
}

impl<K, S, H, P> Guard<K, S, H, P>
where
    K: Eq + Hash + Clone + Debug,
    S: SemaphoreImpl,
    H: BuildHasher + Clone,
    P: Deref<Target = SemaphorePoolImpl<K, S, H>>,
{
    pub(crate) fn new(pool: P, key: K, releaser: Arc<Releaser<K, S>>) -> Self {
        Self {
            pool,
            key,
            releaser: Some(releaser),
        }
    }

    /// The key this guard holds a permit for.
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K, S, H, P> Drop for Guard<K, S, H, P>
where
    K: Eq + Hash + Clone + Debug,
    S: SemaphoreImpl,
    H: BuildHasher + Clone,
    P: Deref<Target = SemaphorePoolImpl<K, S, H>>,
{
    fn drop(&mut self) {
        let releaser = self
            .releaser
            .take()
            .expect("The self.releaser field must always be set unless this was already destructed");
        self.pool.release(releaser);
    }
}

impl<K, S, H, P> Debug for Guard<K, S, H, P>
where
    K: Eq + Hash + Clone + Debug,
    S: SemaphoreImpl,
    H: BuildHasher + Clone,
    P: Deref<Target = SemaphorePoolImpl<K, S, H>>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guard({:?})", self.key)
    }
}
