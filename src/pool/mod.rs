use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::hash_map::RandomState;
use std::fmt::Debug;
use std::hash::{BuildHasher, Hash};
use std::ops::Deref;
use std::sync::Arc;

use crate::error::OptionsError;
use crate::guard::Guard;
use crate::options::Options;
use crate::recycle::ReleaserPool;
use crate::releaser::Releaser;
use crate::semaphore::SemaphoreImpl;

/// A pool of semaphores where individual semaphores are addressed by key.
///
/// Acquiring a permit for key `k` admits up to `max_count` concurrent holders
/// of `k` and is completely independent of acquisitions on any other key.
/// Keys only consume memory while they are held or waited on; once the last
/// interested party releases a key, its backing state leaves the pool again
/// (and is recycled if recycling is configured).
///
/// This trait is implemented by [AsyncSemaphorePool](crate::AsyncSemaphorePool)
/// and [SyncSemaphorePool](crate::SyncSemaphorePool). It covers the surface
/// both share: non-blocking acquisition and introspection. Blocking
/// acquisition lives on [SyncSemaphorePool](crate::SyncSemaphorePool), and
/// `async` acquisition on the
/// [SemaphorePoolAsync](crate::SemaphorePoolAsync) trait.
///
/// ```
/// use semapool::{SemaphorePool, SyncSemaphorePool};
///
/// let pool = SyncSemaphorePool::<_>::new();
/// let guard1 = pool.try_lock(4).unwrap();
/// let guard2 = pool.try_lock(5).unwrap();
///
/// // With the default max_count of 1, key 4 is now taken
/// assert!(pool.try_lock(4).is_none());
///
/// // After dropping the corresponding guard, we can lock it again
/// std::mem::drop(guard1);
/// let guard3 = pool.try_lock(4).unwrap();
/// ```
///
/// You can use an arbitrary type as key, as long as it implements
/// [PartialEq] + [Eq] + [std::hash::Hash] + [Clone] + [Debug].
///
/// ```
/// use semapool::{SemaphorePool, SyncSemaphorePool};
///
/// #[derive(PartialEq, Eq, Hash, Clone, Debug)]
/// struct AccountId(u32);
///
/// let pool = SyncSemaphorePool::<_>::new();
/// let guard = pool.try_lock(AccountId(4)).unwrap();
/// ```
pub trait SemaphorePool<K>: Default
where
    K: Eq + Hash + Clone + Debug,
{
    /// A handle to a held permit. The permit is returned whenever the guard
    /// is dropped, at which point another acquisition for the same key can
    /// succeed. The guard internally borrows the pool, so the pool cannot be
    /// dropped while a guard exists.
    type Guard<'a>: Debug
    where
        Self: 'a;

    /// An owned handle to a held permit.
    /// This guard is only available from a pool that is wrapped in an [Arc].
    /// It is identical to [SemaphorePool::Guard], except that rather than
    /// borrowing the pool, it clones the [Arc], so it has the `'static`
    /// lifetime and can be moved across threads and tasks freely.
    type OwnedGuard: Debug;

    /// Create a pool with default [Options]: one permit per key, no releaser
    /// recycling.
    #[inline]
    fn new() -> Self {
        Self::default()
    }

    /// Create a pool from `options`.
    ///
    /// Errors
    /// -----
    /// Returns an [OptionsError] if the options are contradictory, e.g. a
    /// `max_count` of zero or an initial pool fill exceeding the pool size.
    ///
    /// Examples
    /// -----
    /// ```
    /// use semapool::{Options, SemaphorePool, SyncSemaphorePool};
    ///
    /// let pool = SyncSemaphorePool::<String>::with_options(
    ///     Options::default().max_count(3).pool_size(32),
    /// ).unwrap();
    ///
    /// let _one = pool.try_lock("hot".to_string()).unwrap();
    /// let _two = pool.try_lock("hot".to_string()).unwrap();
    /// let _three = pool.try_lock("hot".to_string()).unwrap();
    /// assert!(pool.try_lock("hot".to_string()).is_none());
    /// ```
    fn with_options(options: Options) -> Result<Self, OptionsError>;

    /// Attempt to take a permit for `key` without waiting.
    ///
    /// Returns [None] if all `max_count` permits for this key are currently
    /// held. Otherwise a RAII guard is returned and the permit is held until
    /// the guard is dropped.
    fn try_lock(&self, key: K) -> Option<Self::Guard<'_>>;

    /// Attempt to take a permit for `key` without waiting.
    ///
    /// This is similar to [SemaphorePool::try_lock], but it works on an
    /// `Arc<Self>` and returns a guard with the `'static` lifetime.
    fn try_lock_owned(self: &Arc<Self>, key: K) -> Option<Self::OwnedGuard>;

    /// Whether `key` currently has holders or waiters.
    ///
    /// This is a racy snapshot: by the time the caller looks at the result,
    /// the key may have been acquired or released by other threads. Treat it
    /// as advisory.
    fn is_in_use(&self, key: &K) -> bool;

    /// The number of parties currently interested in `key`: holders, waiters
    /// and acquirers that are mid-installation. Returns `0` if the key is not
    /// live. Advisory, racy by construction.
    fn remaining_count(&self, key: &K) -> usize;

    /// `max_count` minus [remaining_count](SemaphorePool::remaining_count),
    /// saturating at zero when waiters outnumber permits. Advisory.
    fn current_count(&self, key: &K) -> usize;

    /// The per-key concurrency bound this pool was configured with.
    fn max_count(&self) -> usize;

    /// The number of currently live keys.
    fn len(&self) -> usize;

    /// Whether no key is currently live.
    #[inline]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// This struct implements both [SyncSemaphorePool](crate::SyncSemaphorePool)
/// and [AsyncSemaphorePool](crate::AsyncSemaphorePool). See [SemaphorePool]
/// for the API.
pub struct SemaphorePoolImpl<K, S, H = RandomState>
where
    K: Eq + Hash + Clone + Debug,
    S: SemaphoreImpl,
    H: BuildHasher + Clone,
{
    // Maps each live key to its releaser. Shard locks are only ever held for
    // the duration of a single map operation; in particular, never while a
    // releaser monitor is taken. The release path relies on that: it removes
    // the key while holding the monitor.
    index: DashMap<K, Arc<Releaser<K, S>>, H>,
    recycler: Option<ReleaserPool<K, S>>,
    max_count: usize,
}

impl<K, S, H> Default for SemaphorePoolImpl<K, S, H>
where
    K: Eq + Hash + Clone + Debug,
    S: SemaphoreImpl,
    H: BuildHasher + Clone + Default,
{
    #[inline]
    fn default() -> Self {
        Self {
            index: DashMap::with_hasher(H::default()),
            recycler: None,
            max_count: 1,
        }
    }
}

impl<K, S, H> SemaphorePool<K> for SemaphorePoolImpl<K, S, H>
where
    // TODO Can we remove the 'static bound from K?
    K: Eq + Hash + Clone + Debug + 'static,
    S: SemaphoreImpl + 'static,
    H: BuildHasher + Clone + Default + 'static,
{
    type Guard<'a> = Guard<K, S, H, &'a Self>;
    type OwnedGuard = Guard<K, S, H, Arc<SemaphorePoolImpl<K, S, H>>>;

    fn with_options(options: Options) -> Result<Self, OptionsError> {
        Self::with_options_and_hasher(options, H::default())
    }

    fn try_lock(&self, key: K) -> Option<Self::Guard<'_>> {
        Self::_try_lock(self, key)
    }

    fn try_lock_owned(self: &Arc<Self>, key: K) -> Option<Self::OwnedGuard> {
        Self::_try_lock(Arc::clone(self), key)
    }

    fn is_in_use(&self, key: &K) -> bool {
        let Some(releaser) = self.index.get(key).map(|entry| Arc::clone(entry.value())) else {
            return false;
        };
        let state = releaser.state();
        !state.retired && state.key.as_ref() == Some(key)
    }

    fn remaining_count(&self, key: &K) -> usize {
        let Some(releaser) = self.index.get(key).map(|entry| Arc::clone(entry.value())) else {
            return 0;
        };
        let state = releaser.state();
        if state.retired || state.key.as_ref() != Some(key) {
            0
        } else {
            state.ref_count
        }
    }

    fn current_count(&self, key: &K) -> usize {
        // ref_count exceeds max_count while waiters queue up
        self.max_count.saturating_sub(self.remaining_count(key))
    }

    #[inline]
    fn max_count(&self) -> usize {
        self.max_count
    }

    #[inline]
    fn len(&self) -> usize {
        self.index.len()
    }
}

impl<K, S, H> SemaphorePoolImpl<K, S, H>
where
    K: Eq + Hash + Clone + Debug,
    S: SemaphoreImpl,
    H: BuildHasher + Clone,
{
    /// Create a pool from `options`, hashing keys with `hasher`. This is the
    /// constructor to use for keys with a custom hash/equality scheme; for
    /// default-hashed keys see [SemaphorePool::with_options].
    pub fn with_options_and_hasher(options: Options, hasher: H) -> Result<Self, OptionsError> {
        options.validate()?;
        let index = match options.shard_amount {
            // The index wants a power-of-two shard count of at least two.
            Some(shards) => DashMap::with_capacity_and_hasher_and_shard_amount(
                options.capacity,
                hasher,
                shards.next_power_of_two().max(2),
            ),
            None => DashMap::with_capacity_and_hasher(options.capacity, hasher),
        };
        let recycler = if options.pool_size > 0 {
            Some(ReleaserPool::new(
                options.pool_size,
                options.initial_fill(),
                options.max_count,
            ))
        } else {
            None
        };
        Ok(Self {
            index,
            recycler,
            max_count: options.max_count,
        })
    }

    /// Obtain the releaser for `key`, registering the caller as an interested
    /// party. Exactly one releaser represents a key at any instant, no matter
    /// how many acquirers race here.
    pub(crate) fn get_or_add(&self, key: &K) -> Arc<Releaser<K, S>> {
        // Fast path: the key is live and its releaser can be adopted. The Arc
        // is cloned out of the shard guard before the releaser monitor is
        // taken, see the field comment on `index`.
        if let Some(existing) = self.index.get(key).map(|entry| Arc::clone(entry.value())) {
            if existing.try_increment(key) {
                return existing;
            }
        }

        // Slow path: prepare a releaser that already counts us, then race to
        // install it.
        let fresh = match &self.recycler {
            Some(recycler) => recycler.take(key.clone()),
            None => Arc::new(Releaser::new(key.clone(), self.max_count)),
        };
        loop {
            let winner = match self.index.entry(key.clone()) {
                Entry::Vacant(entry) => {
                    entry.insert(Arc::clone(&fresh));
                    return fresh;
                }
                Entry::Occupied(entry) => Arc::clone(entry.get()),
            };
            if winner.try_increment(key) {
                // Lost the installation race and `fresh` was never published,
                // so nobody else can hold a stake in it.
                fresh.retire();
                if let Some(recycler) = &self.recycler {
                    recycler.put(fresh);
                }
                return winner;
            }
            // The winner failed the increment because it is mid-retirement
            // and about to leave the index. Retry; the next round either
            // installs `fresh` or adopts whatever replaced the winner.
        }
    }

    /// Release one party's interest in `key` and return its permit. Runs when
    /// a [Guard](crate::Guard) is dropped.
    pub(crate) fn release(&self, releaser: Arc<Releaser<K, S>>) {
        self.release_inner(releaser, true);
    }

    /// Release one party's interest without returning a permit: the caller
    /// never took one because its wait timed out, was canceled, or was
    /// dropped.
    pub(crate) fn release_without_permit(&self, releaser: Arc<Releaser<K, S>>) {
        self.release_inner(releaser, false);
    }

    fn release_inner(&self, releaser: Arc<Releaser<K, S>>, return_permit: bool) {
        let mut state = releaser.state();
        if state.ref_count == 1 {
            // Last interested party. Unpublish the key while still holding
            // the monitor: a racing acquirer either no longer finds the
            // entry, or finds it and then fails its increment against the
            // retired flag, and retries.
            if let Some(key) = state.key.take() {
                self.index.remove(&key);
            }
            state.ref_count = 0;
            state.retired = true;
            drop(state);
            if let Some(recycler) = &self.recycler {
                recycler.put(Arc::clone(&releaser));
            }
            // The permit goes back last. A recycled releaser can therefore
            // briefly be one permit short, but never over capacity.
            if return_permit {
                releaser.semaphore().release();
            }
            return;
        }
        state.ref_count -= 1;
        drop(state);
        if return_permit {
            releaser.semaphore().release();
        }
    }

    pub(super) fn _try_lock<P: Deref<Target = Self>>(
        this: P,
        key: K,
    ) -> Option<Guard<K, S, H, P>> {
        let releaser = this.get_or_add(&key);
        if releaser.semaphore().try_acquire() {
            Some(Guard::new(this, key, releaser))
        } else {
            this.release_without_permit(releaser);
            None
        }
    }

    #[cfg(test)]
    pub(crate) fn recycler(&self) -> Option<&ReleaserPool<K, S>> {
        self.recycler.as_ref()
    }
}

/// Tracks an interested party between `get_or_add` and the end of its wait.
/// If the wait fails or the waiting future is dropped, the drop of this
/// reservation releases the interest without returning a permit; a successful
/// wait consumes it via [Reservation::complete].
pub(super) struct Reservation<'a, K, S, H>
where
    K: Eq + Hash + Clone + Debug,
    S: SemaphoreImpl,
    H: BuildHasher + Clone,
{
    pool: &'a SemaphorePoolImpl<K, S, H>,
    releaser: Option<Arc<Releaser<K, S>>>,
}

impl<'a, K, S, H> Reservation<'a, K, S, H>
where
    K: Eq + Hash + Clone + Debug,
    S: SemaphoreImpl,
    H: BuildHasher + Clone,
{
    pub(super) fn new(
        pool: &'a SemaphorePoolImpl<K, S, H>,
        releaser: Arc<Releaser<K, S>>,
    ) -> Self {
        Self {
            pool,
            releaser: Some(releaser),
        }
    }

    pub(super) fn releaser(&self) -> &Arc<Releaser<K, S>> {
        self.releaser
            .as_ref()
            .expect("The self.releaser field is only taken on completion or drop")
    }

    /// The wait succeeded and a permit was taken; hand the releaser over to
    /// the guard instead of releasing it on drop.
    pub(super) fn complete(mut self) -> Arc<Releaser<K, S>> {
        self.releaser
            .take()
            .expect("The self.releaser field is only taken on completion or drop")
    }
}

impl<'a, K, S, H> Drop for Reservation<'a, K, S, H>
where
    K: Eq + Hash + Clone + Debug,
    S: SemaphoreImpl,
    H: BuildHasher + Clone,
{
    fn drop(&mut self) {
        if let Some(releaser) = self.releaser.take() {
            self.pool.release_without_permit(releaser);
        }
    }
}


#[cfg(feature = "tokio")]
pub mod pool_async;
pub mod pool_sync;
