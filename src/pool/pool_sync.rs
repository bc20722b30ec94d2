use std::collections::hash_map::RandomState;
use std::fmt::Debug;
use std::hash::{BuildHasher, Hash};
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use crate::guard::Guard;
use crate::pool::{Reservation, SemaphorePoolImpl};
use crate::semaphore::SyncSemaphore;

/// [SyncSemaphorePool] is an implementation of
/// [SemaphorePool](crate::SemaphorePool) (see [SemaphorePool](crate::SemaphorePool)
/// for API details) for synchronous code. It is a little faster than
/// [AsyncSemaphorePool](crate::AsyncSemaphorePool) but waiting for a permit
/// blocks the calling thread, so it must not be used from `async` contexts.
///
/// [SyncSemaphorePool] is based on a mutex/condvar semaphore and additionally
/// offers blocking acquisition: [lock](SyncSemaphorePool::lock),
/// [try_lock_for](SyncSemaphorePool::try_lock_for) and the callback wrappers
/// [with_lock](SyncSemaphorePool::with_lock) and
/// [try_with_lock_for](SyncSemaphorePool::try_with_lock_for).
pub type SyncSemaphorePool<K, H = RandomState> = SemaphorePoolImpl<K, SyncSemaphore, H>;

impl<K, H> SyncSemaphorePool<K, H>
where
    K: Eq + Hash + Clone + Debug,
    H: BuildHasher + Clone,
{
    /// Take a permit for `key`, blocking the current thread until one is
    /// available.
    ///
    /// Up to `max_count` holders of the same key are admitted concurrently.
    /// A RAII guard is returned; the permit is held until the guard is
    /// dropped.
    ///
    /// Re-locking a key on a thread that already holds it consumes another
    /// permit and deadlocks if none remain, so with the default `max_count`
    /// of 1 this function must not be called twice for the same key on one
    /// thread.
    ///
    /// Examples
    /// -----
    /// ```
    /// use semapool::{SemaphorePool, SyncSemaphorePool};
    ///
    /// let pool = SyncSemaphorePool::<_>::new();
    /// let guard1 = pool.lock(4);
    /// let guard2 = pool.lock(5);
    ///
    /// // This next line would deadlock because `4` is already locked on this thread
    /// // let guard3 = pool.lock(4);
    ///
    /// // After dropping the corresponding guard, we can lock it again
    /// std::mem::drop(guard1);
    /// let guard3 = pool.lock(4);
    /// ```
    pub fn lock(&self, key: K) -> Guard<K, SyncSemaphore, H, &Self> {
        Self::_lock(self, key)
    }

    /// Take a permit for `key`, blocking the current thread until one is
    /// available.
    ///
    /// This is similar to [lock](SyncSemaphorePool::lock), but it works on an
    /// `Arc<SyncSemaphorePool>` and returns a guard that clones the [Arc]
    /// instead of borrowing the pool, so it has the `'static` lifetime and
    /// can be moved across threads freely.
    pub fn lock_owned(self: &Arc<Self>, key: K) -> Guard<K, SyncSemaphore, H, Arc<Self>> {
        Self::_lock(Arc::clone(self), key)
    }

    /// Take a permit for `key`, blocking for at most `timeout`.
    ///
    /// Returns [None] if the timeout elapsed without a permit becoming
    /// available. Timing out is not an error: the acquisition is cleanly
    /// rolled back and the key's interest count is decremented again.
    ///
    /// Examples
    /// -----
    /// ```
    /// use semapool::{SemaphorePool, SyncSemaphorePool};
    /// use std::time::Duration;
    ///
    /// let pool = SyncSemaphorePool::<_>::new();
    /// let guard = pool.lock(4);
    ///
    /// assert!(pool.try_lock_for(4, Duration::from_millis(10)).is_none());
    ///
    /// std::mem::drop(guard);
    /// assert!(pool.try_lock_for(4, Duration::from_millis(10)).is_some());
    /// ```
    pub fn try_lock_for(
        &self,
        key: K,
        timeout: Duration,
    ) -> Option<Guard<K, SyncSemaphore, H, &Self>> {
        Self::_try_lock_for(self, key, timeout)
    }

    /// Take a permit for `key`, blocking for at most `timeout`.
    ///
    /// This is similar to [try_lock_for](SyncSemaphorePool::try_lock_for),
    /// but it works on an `Arc<SyncSemaphorePool>` and returns a guard with
    /// the `'static` lifetime.
    pub fn try_lock_for_owned(
        self: &Arc<Self>,
        key: K,
        timeout: Duration,
    ) -> Option<Guard<K, SyncSemaphore, H, Arc<Self>>> {
        Self::_try_lock_for(Arc::clone(self), key, timeout)
    }

    /// Run `body` while holding a permit for `key`.
    ///
    /// The permit is released when `body` returns, and also when it panics.
    pub fn with_lock<R>(&self, key: K, body: impl FnOnce() -> R) -> R {
        let guard = self.lock(key);
        let result = body();
        drop(guard);
        result
    }

    /// Run `body` while holding a permit for `key`, waiting at most `timeout`
    /// for the permit.
    ///
    /// Returns [None] without running `body` if the timeout elapsed.
    pub fn try_with_lock_for<R>(
        &self,
        key: K,
        timeout: Duration,
        body: impl FnOnce() -> R,
    ) -> Option<R> {
        let guard = self.try_lock_for(key, timeout)?;
        let result = body();
        drop(guard);
        Some(result)
    }

    fn _lock<P: Deref<Target = Self>>(this: P, key: K) -> Guard<K, SyncSemaphore, H, P> {
        let releaser = this.get_or_add(&key);
        // The interest is registered; now wait for a permit. This wait cannot
        // fail, so no rollback path is needed.
        releaser.semaphore().acquire();
        Guard::new(this, key, releaser)
    }

    fn _try_lock_for<P: Deref<Target = Self>>(
        this: P,
        key: K,
        timeout: Duration,
    ) -> Option<Guard<K, SyncSemaphore, H, P>> {
        let reservation = Reservation::new(&*this, this.get_or_add(&key));
        if !reservation.releaser().semaphore().acquire_timeout(timeout) {
            // Dropping the reservation rolls the interest back without
            // returning a permit we never took.
            return None;
        }
        let releaser = reservation.complete();
        Some(Guard::new(this, key, releaser))
    }
}

#[cfg(test)]
mod tests {
    use super::SyncSemaphorePool;
    use crate::{Options, SemaphorePool};
    use std::panic::AssertUnwindSafe;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    crate::instantiate_common_tests!(common, crate::SyncSemaphorePool<isize>);

    #[test]
    fn test_mutual_exclusion_on_one_key() {
        const NUM_THREADS: u32 = 64;

        let pool = Arc::new(SyncSemaphorePool::<_>::new());
        let inside = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));
        let total = Arc::new(AtomicU32::new(0));

        let children: Vec<_> = (0..NUM_THREADS)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let inside = Arc::clone(&inside);
                let peak = Arc::clone(&peak);
                let total = Arc::clone(&total);
                thread::spawn(move || {
                    let _guard = pool.lock("A");
                    let now_inside = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now_inside, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(1));
                    total.fetch_add(1, Ordering::SeqCst);
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for child in children {
            child.join().unwrap();
        }

        assert_eq!(NUM_THREADS, total.load(Ordering::SeqCst));
        assert_eq!(1, peak.load(Ordering::SeqCst));
        assert_eq!(0, pool.len());
        assert_eq!(0, pool.remaining_count(&"A"));
    }

    #[test]
    fn test_max_count_admits_exactly_that_many() {
        const NUM_THREADS: u32 = 10;

        let pool = Arc::new(
            SyncSemaphorePool::<&str>::with_options(Options::default().max_count(3)).unwrap(),
        );
        let inside = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));
        let start = Arc::new(Barrier::new(NUM_THREADS as usize));

        let children: Vec<_> = (0..NUM_THREADS)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let inside = Arc::clone(&inside);
                let peak = Arc::clone(&peak);
                let start = Arc::clone(&start);
                thread::spawn(move || {
                    start.wait();
                    let _guard = pool.lock("X");
                    let now_inside = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now_inside, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(100));
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for child in children {
            child.join().unwrap();
        }

        assert_eq!(3, peak.load(Ordering::SeqCst));
        assert_eq!(0, pool.len());
    }

    #[test]
    fn test_keys_are_independent() {
        let pool = SyncSemaphorePool::<_>::new();
        let guard_a = pool.lock("A");

        // If keys interfered, this would deadlock.
        let guard_b = pool.lock("B");
        assert_eq!(2, pool.len());

        drop(guard_a);
        drop(guard_b);
        assert_eq!(0, pool.len());
    }

    #[test]
    fn test_timeout_rolls_back_and_key_recovers() {
        let pool = Arc::new(SyncSemaphorePool::<_>::new());
        let guard = pool.lock("K");

        let child = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.try_lock_for("K", Duration::from_millis(50)).is_some())
        };
        assert!(!child.join().unwrap());

        // The timed-out waiter must not have leaked interest.
        assert_eq!(1, pool.remaining_count(&"K"));

        drop(guard);
        {
            let _guard = pool.try_lock_for("K", Duration::from_secs(5)).unwrap();
        }
        assert_eq!(0, pool.remaining_count(&"K"));
        assert_eq!(0, pool.len());
    }

    #[test]
    fn test_round_trip_leaves_pool_stocked() {
        let pool = SyncSemaphorePool::<isize>::with_options(
            Options::default().pool_size(8).pool_initial_fill(0),
        )
        .unwrap();

        for _ in 0..100 {
            let _guard = pool.lock(3);
        }

        assert_eq!(0, pool.len());
        let recycler = pool.recycler().unwrap();
        assert!(recycler.len() >= 1);
        assert!(recycler.len() <= 8);
    }

    #[test]
    fn test_rotating_keys_stress() {
        const NUM_THREADS: usize = 8;
        const NUM_KEYS: isize = 100;
        const ITERATIONS: usize = 500;

        let pool = Arc::new(
            SyncSemaphorePool::<isize>::with_options(Options::default().pool_size(32)).unwrap(),
        );

        let children: Vec<_> = (0..NUM_THREADS)
            .map(|thread_index| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    for iteration in 0..ITERATIONS {
                        let key = ((thread_index + iteration) as isize) % NUM_KEYS;
                        let _guard = pool.lock(key);
                        std::hint::black_box(key);
                    }
                })
            })
            .collect();
        for child in children {
            child.join().unwrap();
        }

        assert_eq!(0, pool.len());
        assert!(pool.recycler().unwrap().len() <= 32);
    }

    #[test]
    fn test_recycled_releaser_rejects_stale_key() {
        let pool =
            SyncSemaphorePool::<isize>::with_options(Options::default().pool_size(4)).unwrap();

        // Hold the releaser for key 1 by raw reference only, then retire it.
        let stale = pool.get_or_add(&1);
        pool.release_without_permit(Arc::clone(&stale));
        assert_eq!(0, pool.len());

        // It gets recycled for key 2.
        let current = pool.get_or_add(&2);
        assert!(Arc::ptr_eq(&stale, &current));

        // An acquirer that still believes this releaser represents key 1 must
        // not be able to adopt it.
        assert!(!stale.try_increment(&1));
        assert!(stale.try_increment(&2));

        pool.release_without_permit(Arc::clone(&current));
        pool.release_without_permit(current);
        assert_eq!(0, pool.len());
    }

    #[test]
    fn test_counts_with_multiple_holders() {
        let pool =
            SyncSemaphorePool::<&str>::with_options(Options::default().max_count(3)).unwrap();

        assert_eq!(0, pool.remaining_count(&"key"));
        assert_eq!(3, pool.current_count(&"key"));
        assert!(!pool.is_in_use(&"key"));

        let guard1 = pool.lock("key");
        let guard2 = pool.lock("key");
        assert_eq!(2, pool.remaining_count(&"key"));
        assert_eq!(1, pool.current_count(&"key"));
        assert!(pool.is_in_use(&"key"));

        drop(guard1);
        drop(guard2);
        assert_eq!(0, pool.remaining_count(&"key"));
        assert!(!pool.is_in_use(&"key"));
    }

    #[test]
    fn test_with_lock_runs_body_under_the_lock() {
        let pool = SyncSemaphorePool::<_>::new();
        let result = pool.with_lock(4, || {
            assert!(pool.is_in_use(&4));
            42
        });
        assert_eq!(42, result);
        assert_eq!(0, pool.len());
    }

    #[test]
    fn test_with_lock_releases_on_panic() {
        let pool = SyncSemaphorePool::<_>::new();
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
            pool.with_lock(4, || panic!("body failed"))
        }));
        assert!(result.is_err());

        // The permit must have been returned despite the panic.
        assert_eq!(0, pool.len());
        let _guard = pool.try_lock(4).unwrap();
    }

    #[test]
    fn test_try_with_lock_for_skips_body_on_timeout() {
        let pool = SyncSemaphorePool::<_>::new();
        let guard = pool.lock(4);

        let ran = AtomicU32::new(0);
        let result = pool.try_with_lock_for(4, Duration::from_millis(10), || {
            ran.fetch_add(1, Ordering::SeqCst);
        });
        assert!(result.is_none());
        assert_eq!(0, ran.load(Ordering::SeqCst));

        drop(guard);
        let result = pool.try_with_lock_for(4, Duration::from_millis(10), || {
            ran.fetch_add(1, Ordering::SeqCst);
            "ran"
        });
        assert_eq!(Some("ran"), result);
        assert_eq!(1, ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_lock_owned_moves_across_threads() {
        let pool = Arc::new(SyncSemaphorePool::<_>::new());
        let guard = pool.lock_owned(4);

        let child = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                drop(guard);
                let _guard = pool.lock_owned(4);
            })
        };
        child.join().unwrap();
        assert_eq!(0, pool.len());
    }
}
