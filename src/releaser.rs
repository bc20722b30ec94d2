use parking_lot::{Mutex, MutexGuard};

use crate::semaphore::SemaphoreImpl;

/// Bookkeeping for one releaser, always read and written under the releaser's
/// monitor.
pub(crate) struct ReleaserState<K> {
    /// The key this releaser currently represents. `None` while the releaser
    /// sits in the recycling pool with no identity.
    pub(crate) key: Option<K>,
    /// Number of parties currently interested in this releaser for its
    /// current key: every holder, every waiter, and the acquirer that
    /// installed it.
    pub(crate) ref_count: usize,
    /// Set while the releaser is outside the index: in the pool, or in the
    /// transient window where a racing acquirer can still observe a stale
    /// index entry.
    pub(crate) retired: bool,
}

/// The per-live-key record: one bounded semaphore plus monitor-guarded
/// bookkeeping that decides when the key becomes inactive.
pub(crate) struct Releaser<K, S> {
    semaphore: S,
    state: Mutex<ReleaserState<K>>,
}

impl<K, S> Releaser<K, S>
where
    S: SemaphoreImpl,
{
    /// A releaser representing `key`, counting its creator as the one
    /// interested party. The count must be set before the releaser is
    /// published to the index.
    pub(crate) fn new(key: K, permits: usize) -> Self {
        Self {
            semaphore: S::with_permits(permits),
            state: Mutex::new(ReleaserState {
                key: Some(key),
                ref_count: 1,
                retired: false,
            }),
        }
    }

    /// A spare with no identity, for prefilling the recycling pool.
    pub(crate) fn spare(permits: usize) -> Self {
        Self {
            semaphore: S::with_permits(permits),
            state: Mutex::new(ReleaserState {
                key: None,
                ref_count: 0,
                retired: true,
            }),
        }
    }

    pub(crate) fn semaphore(&self) -> &S {
        &self.semaphore
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, ReleaserState<K>> {
        self.state.lock()
    }

    /// Give a pooled releaser a new identity. Only the recycling pool calls
    /// this, after popping the releaser off the free list, so no other party
    /// can hold a stake in it.
    pub(crate) fn recycle(&self, key: K) {
        let mut state = self.state.lock();
        debug_assert!(state.retired && state.ref_count == 0);
        state.key = Some(key);
        state.ref_count = 1;
        state.retired = false;
    }

    /// Strip an unpublished releaser of its identity so it can go back to the
    /// pool. Used when a racing acquirer lost the installation race and its
    /// prepared releaser was never published.
    pub(crate) fn retire(&self) {
        let mut state = self.state.lock();
        state.key = None;
        state.ref_count = 0;
        state.retired = true;
    }
}

impl<K, S> Releaser<K, S>
where
    K: Eq,
    S: SemaphoreImpl,
{
    /// Register interest in this releaser for `key`.
    ///
    /// Fails if the releaser has been retired, or if it now represents a
    /// different key. The key comparison is what defeats the recycling race:
    /// between reading this releaser out of the index and arriving here, it
    /// may have been retired and recycled for another key, and then it must
    /// not be adopted for the old one.
    pub(crate) fn try_increment(&self, key: &K) -> bool {
        let mut state = self.state.lock();
        if state.retired || state.key.as_ref() != Some(key) {
            return false;
        }
        state.ref_count += 1;
        true
    }
}
