use async_trait::async_trait;
use std::collections::hash_map::RandomState;
use std::fmt::Debug;
use std::future::Future;
use std::hash::{BuildHasher, Hash};
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::Canceled;
use crate::guard::Guard;
use crate::pool::{Reservation, SemaphorePool, SemaphorePoolImpl};

/// [AsyncSemaphorePool] is an implementation of
/// [SemaphorePool](crate::SemaphorePool) (see [SemaphorePool](crate::SemaphorePool)
/// for API details) for asynchronous code. Its guards can be held across
/// `.await` points.
///
/// [AsyncSemaphorePool] is based on [tokio::sync::Semaphore] and waits for
/// permits without blocking the thread. Waiting acquisitions live on the
/// [SemaphorePoolAsync] trait; the non-blocking
/// [try_lock](crate::SemaphorePool::try_lock) and the introspection methods
/// work from synchronous code too.
pub type AsyncSemaphorePool<K, H = RandomState> =
    SemaphorePoolImpl<K, tokio::sync::Semaphore, H>;

/// The asynchronous acquisition API of [AsyncSemaphorePool].
///
/// Every method first registers interest in the key, then waits for a permit
/// of that key's semaphore. If the wait fails (timeout, cancellation, or the
/// returned future being dropped before completion), the interest is released
/// again and no permit is consumed.
#[async_trait]
pub trait SemaphorePoolAsync<K>: SemaphorePool<K>
where
    K: Eq + Hash + Clone + Debug + Send,
{
    /// Wait for a permit for `key`.
    ///
    /// Up to `max_count` holders of the same key are admitted concurrently;
    /// admission among waiters of one key is in FIFO order, inherited from
    /// [tokio::sync::Semaphore]. The permit is held until the returned guard
    /// is dropped.
    ///
    /// A task that already holds `key` and locks it again consumes another
    /// permit and deadlocks if none remain.
    ///
    /// Examples
    /// -----
    /// ```
    /// use semapool::{AsyncSemaphorePool, SemaphorePool, SemaphorePoolAsync};
    ///
    /// # tokio::runtime::Runtime::new().unwrap().block_on(async {
    /// let pool = AsyncSemaphorePool::<_>::new();
    /// let guard1 = pool.lock_async(4).await;
    /// let guard2 = pool.lock_async(5).await;
    ///
    /// // This next line would deadlock because `4` is already locked on this task
    /// // let guard3 = pool.lock_async(4).await;
    ///
    /// // After dropping the corresponding guard, we can lock it again
    /// std::mem::drop(guard1);
    /// let guard3 = pool.lock_async(4).await;
    /// # });
    /// ```
    async fn lock_async(&self, key: K) -> Self::Guard<'_>;

    /// Wait for a permit for `key`.
    ///
    /// This is similar to [lock_async](SemaphorePoolAsync::lock_async), but
    /// it works on an `Arc<Self>` and returns a guard with the `'static`
    /// lifetime that can be moved into spawned tasks.
    async fn lock_owned_async<'a>(self: &'a Arc<Self>, key: K) -> Self::OwnedGuard;

    /// Wait for a permit for `key`, giving up after `timeout`.
    ///
    /// Returns [None] if the timeout elapsed first. Timing out is not an
    /// error: the acquisition is cleanly rolled back.
    async fn try_lock_for_async(&self, key: K, timeout: Duration) -> Option<Self::Guard<'_>>;

    /// Wait for a permit for `key`, giving up after `timeout`.
    ///
    /// This is similar to
    /// [try_lock_for_async](SemaphorePoolAsync::try_lock_for_async), but it
    /// works on an `Arc<Self>` and returns a guard with the `'static`
    /// lifetime.
    async fn try_lock_for_owned_async<'a>(
        self: &'a Arc<Self>,
        key: K,
        timeout: Duration,
    ) -> Option<Self::OwnedGuard>;

    /// Wait for a permit for `key`, giving up when `token` is canceled.
    ///
    /// If the token fires before a permit was granted, the acquisition is
    /// rolled back and [Canceled] is returned. If it fires afterwards, the
    /// permit was taken and the guard is returned normally.
    async fn lock_cancelable_async(
        &self,
        key: K,
        token: CancellationToken,
    ) -> Result<Self::Guard<'_>, Canceled>;

    /// Wait for a permit for `key`, giving up after `timeout` or when `token`
    /// is canceled, whichever comes first.
    ///
    /// Returns `Ok(None)` on timeout and `Err(Canceled)` on cancellation.
    async fn try_lock_for_cancelable_async(
        &self,
        key: K,
        timeout: Duration,
        token: CancellationToken,
    ) -> Result<Option<Self::Guard<'_>>, Canceled>;
}

#[async_trait]
impl<K, H> SemaphorePoolAsync<K> for AsyncSemaphorePool<K, H>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    H: BuildHasher + Clone + Default + Send + Sync + 'static,
{
    async fn lock_async(&self, key: K) -> Self::Guard<'_> {
        Self::_lock_async(self, key).await
    }

    async fn lock_owned_async<'a>(self: &'a Arc<Self>, key: K) -> Self::OwnedGuard {
        Self::_lock_async(Arc::clone(self), key).await
    }

    async fn try_lock_for_owned_async<'a>(
        self: &'a Arc<Self>,
        key: K,
        timeout: Duration,
    ) -> Option<Self::OwnedGuard> {
        Self::_try_lock_for_async(Arc::clone(self), key, timeout).await
    }

    async fn try_lock_for_async(&self, key: K, timeout: Duration) -> Option<Self::Guard<'_>> {
        Self::_try_lock_for_async(self, key, timeout).await
    }

    async fn lock_cancelable_async(
        &self,
        key: K,
        token: CancellationToken,
    ) -> Result<Self::Guard<'_>, Canceled> {
        Self::_lock_cancelable_async(self, key, token).await
    }

    async fn try_lock_for_cancelable_async(
        &self,
        key: K,
        timeout: Duration,
        token: CancellationToken,
    ) -> Result<Option<Self::Guard<'_>>, Canceled> {
        Self::_try_lock_for_cancelable_async(self, key, timeout, token).await
    }
}

impl<K, H> AsyncSemaphorePool<K, H>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    H: BuildHasher + Clone + Default + Send + Sync + 'static,
{
    /// Run `body` while holding a permit for `key`.
    ///
    /// The permit is released when the future returned by `body` completes,
    /// and also when it is dropped or panics.
    pub async fn with_lock_async<R, Fut>(&self, key: K, body: impl FnOnce() -> Fut) -> R
    where
        Fut: Future<Output = R>,
    {
        let guard = Self::_lock_async(self, key).await;
        let result = body().await;
        drop(guard);
        result
    }

    /// Run `body` while holding a permit for `key`, waiting at most `timeout`
    /// for the permit.
    ///
    /// Returns [None] without running `body` if the timeout elapsed.
    pub async fn try_with_lock_for_async<R, Fut>(
        &self,
        key: K,
        timeout: Duration,
        body: impl FnOnce() -> Fut,
    ) -> Option<R>
    where
        Fut: Future<Output = R>,
    {
        let guard = Self::_try_lock_for_async(self, key, timeout).await?;
        let result = body().await;
        drop(guard);
        Some(result)
    }

    async fn _lock_async<P: Deref<Target = Self>>(
        this: P,
        key: K,
    ) -> Guard<K, tokio::sync::Semaphore, H, P> {
        let reservation = Reservation::new(&*this, this.get_or_add(&key));
        // If this future is dropped while waiting here, the reservation rolls
        // the interest back so the key cannot leak.
        let permit = reservation.releaser().semaphore().acquire().await;
        permit.expect("the semaphore is never closed").forget();
        let releaser = reservation.complete();
        Guard::new(this, key, releaser)
    }

    async fn _try_lock_for_async<P: Deref<Target = Self>>(
        this: P,
        key: K,
        timeout: Duration,
    ) -> Option<Guard<K, tokio::sync::Semaphore, H, P>> {
        let reservation = Reservation::new(&*this, this.get_or_add(&key));
        let entered = match tokio::time::timeout(
            timeout,
            reservation.releaser().semaphore().acquire(),
        )
        .await
        {
            Ok(permit) => {
                permit.expect("the semaphore is never closed").forget();
                true
            }
            Err(_elapsed) => false,
        };
        if !entered {
            // Dropping the reservation rolls the interest back without
            // returning a permit we never took.
            return None;
        }
        let releaser = reservation.complete();
        Some(Guard::new(this, key, releaser))
    }

    async fn _lock_cancelable_async<P: Deref<Target = Self>>(
        this: P,
        key: K,
        token: CancellationToken,
    ) -> Result<Guard<K, tokio::sync::Semaphore, H, P>, Canceled> {
        let reservation = Reservation::new(&*this, this.get_or_add(&key));
        let entered = tokio::select! {
            permit = reservation.releaser().semaphore().acquire() => {
                permit.expect("the semaphore is never closed").forget();
                true
            }
            _ = token.cancelled() => false,
        };
        if !entered {
            return Err(Canceled);
        }
        let releaser = reservation.complete();
        Ok(Guard::new(this, key, releaser))
    }

    async fn _try_lock_for_cancelable_async<P: Deref<Target = Self>>(
        this: P,
        key: K,
        timeout: Duration,
        token: CancellationToken,
    ) -> Result<Option<Guard<K, tokio::sync::Semaphore, H, P>>, Canceled> {
        enum Wait {
            Entered,
            TimedOut,
            TokenFired,
        }

        let reservation = Reservation::new(&*this, this.get_or_add(&key));
        let wait = tokio::select! {
            acquired = tokio::time::timeout(
                timeout,
                reservation.releaser().semaphore().acquire(),
            ) => {
                match acquired {
                    Ok(permit) => {
                        permit.expect("the semaphore is never closed").forget();
                        Wait::Entered
                    }
                    Err(_elapsed) => Wait::TimedOut,
                }
            }
            _ = token.cancelled() => Wait::TokenFired,
        };
        match wait {
            Wait::Entered => {
                let releaser = reservation.complete();
                Ok(Some(Guard::new(this, key, releaser)))
            }
            Wait::TimedOut => Ok(None),
            Wait::TokenFired => Err(Canceled),
        }
    }
}
