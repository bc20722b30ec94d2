use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// The bounded semaphore backing each key of a pool.
///
/// This trait only covers the operations the pool engine itself needs:
/// construction, non-blocking acquisition, returning a permit, and reading the
/// current permit count. The *waiting* flavors differ too much between
/// synchronous and asynchronous semaphores to share a signature, so they live
/// on the concrete types instead: [SyncSemaphore] offers blocking and
/// deadline-bounded waits, [tokio::sync::Semaphore] offers `async` waits.
pub trait SemaphoreImpl: Send + Sync {
    /// Create a semaphore holding `permits` permits.
    fn with_permits(permits: usize) -> Self;

    /// The number of permits currently available.
    fn available_permits(&self) -> usize;

    /// Take a permit if one is available right now. Returns whether a permit
    /// was taken.
    fn try_acquire(&self) -> bool;

    /// Return one permit.
    fn release(&self);
}

/// A counting semaphore for synchronous code, built on a parking_lot mutex
/// and condition variable.
///
/// Unlike [tokio::sync::Semaphore], permits are plain counts rather than RAII
/// objects; callers pair [acquire](SyncSemaphore::acquire) with
/// [release](SemaphoreImpl::release) themselves. Within this crate that
/// pairing is enforced by the pool's guard.
///
/// Waiters are woken in whatever order the condition variable chooses; no
/// FIFO admission is promised.
pub struct SyncSemaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

impl SyncSemaphore {
    /// Block the current thread until a permit is available, then take it.
    pub fn acquire(&self) {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.available.wait(&mut permits);
        }
        *permits -= 1;
    }

    /// Block until a permit is available or `timeout` elapses. Returns whether
    /// a permit was taken.
    pub fn acquire_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut permits = self.permits.lock();
        loop {
            if *permits > 0 {
                *permits -= 1;
                return true;
            }
            if self.available.wait_until(&mut permits, deadline).timed_out() {
                // A release may have slipped in right at the deadline.
                if *permits > 0 {
                    *permits -= 1;
                    return true;
                }
                return false;
            }
        }
    }
}

impl SemaphoreImpl for SyncSemaphore {
    fn with_permits(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            available: Condvar::new(),
        }
    }

    fn available_permits(&self) -> usize {
        *self.permits.lock()
    }

    fn try_acquire(&self) -> bool {
        let mut permits = self.permits.lock();
        if *permits > 0 {
            *permits -= 1;
            true
        } else {
            false
        }
    }

    fn release(&self) {
        let mut permits = self.permits.lock();
        *permits += 1;
        drop(permits);
        self.available.notify_one();
    }
}

#[cfg(feature = "tokio")]
impl SemaphoreImpl for tokio::sync::Semaphore {
    fn with_permits(permits: usize) -> Self {
        tokio::sync::Semaphore::new(permits)
    }

    fn available_permits(&self) -> usize {
        tokio::sync::Semaphore::available_permits(self)
    }

    fn try_acquire(&self) -> bool {
        match tokio::sync::Semaphore::try_acquire(self) {
            Ok(permit) => {
                // The pool tracks permits by count and returns them through
                // `release`, so convert the RAII permit into a bare count.
                permit.forget();
                true
            }
            // try_acquire only fails with NoPermits or Closed and we never
            // close the semaphore, see https://docs.rs/tokio/latest/tokio/sync/struct.Semaphore.html
            Err(_) => false,
        }
    }

    fn release(&self) {
        self.add_permits(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn try_acquire_until_empty() {
        let semaphore = SyncSemaphore::with_permits(2);
        assert_eq!(2, semaphore.available_permits());
        assert!(semaphore.try_acquire());
        assert!(semaphore.try_acquire());
        assert!(!semaphore.try_acquire());
        semaphore.release();
        assert_eq!(1, semaphore.available_permits());
        assert!(semaphore.try_acquire());
    }

    #[test]
    fn acquire_timeout_expires_when_empty() {
        let semaphore = SyncSemaphore::with_permits(1);
        semaphore.acquire();
        assert!(!semaphore.acquire_timeout(Duration::from_millis(50)));
        assert_eq!(0, semaphore.available_permits());
    }

    #[test]
    fn acquire_timeout_succeeds_after_release() {
        let semaphore = Arc::new(SyncSemaphore::with_permits(1));
        semaphore.acquire();

        let releaser = Arc::clone(&semaphore);
        let child = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            releaser.release();
        });

        assert!(semaphore.acquire_timeout(Duration::from_secs(5)));
        child.join().unwrap();
    }

    #[test]
    fn blocking_acquire_waits_for_release() {
        let semaphore = Arc::new(SyncSemaphore::with_permits(1));
        semaphore.acquire();

        let waiter = {
            let semaphore = Arc::clone(&semaphore);
            thread::spawn(move || {
                semaphore.acquire();
                semaphore.release();
            })
        };

        thread::sleep(Duration::from_millis(50));
        semaphore.release();
        waiter.join().unwrap();
        assert_eq!(1, semaphore.available_permits());
    }

    #[cfg(feature = "tokio")]
    #[test]
    fn tokio_semaphore_forgets_permits() {
        let semaphore = <tokio::sync::Semaphore as SemaphoreImpl>::with_permits(1);
        assert!(SemaphoreImpl::try_acquire(&semaphore));
        assert!(!SemaphoreImpl::try_acquire(&semaphore));
        SemaphoreImpl::release(&semaphore);
        assert_eq!(1, SemaphoreImpl::available_permits(&semaphore));
    }
}
