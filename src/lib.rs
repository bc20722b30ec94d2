//! This library offers a pool of semaphores where individual semaphores can be
//! acquired/released by key. It initially considers all keys as "free", and
//! each key admits up to a configurable `max_count` of concurrent holders.
//! If that many holders are already inside, further acquirers for the same
//! key have to wait, while acquisitions on any other key proceed completely
//! independently. This serializes critical sections on logical entities
//! (account ids, file paths, tenant ids) without serializing unrelated work.
//!
//! ```
//! use semapool::{SemaphorePool, SyncSemaphorePool};
//!
//! let pool = SyncSemaphorePool::<_>::new();
//! let guard1 = pool.lock(4);
//! let guard2 = pool.lock(5);
//!
//! // This next line would deadlock because `4` is already locked on this thread
//! // let guard3 = pool.lock(4);
//!
//! // After dropping the corresponding guard, we can lock it again
//! std::mem::drop(guard1);
//! let guard3 = pool.lock(4);
//! ```
//!
//! You can use an arbitrary type to key semaphores by, as long as that type
//! implements [PartialEq] + [Eq] + [std::hash::Hash] + [Clone] +
//! [Debug](std::fmt::Debug).
//!
//! ```
//! use semapool::{SemaphorePool, SyncSemaphorePool};
//!
//! #[derive(PartialEq, Eq, Hash, Clone, Debug)]
//! struct TenantId(u32);
//!
//! let pool = SyncSemaphorePool::<_>::new();
//! let guard = pool.lock(TenantId(4));
//! ```
//!
//! Keys only consume memory while they are held or waited on. Under the hood,
//! the pool is a sharded hash map from key to a small per-key record (a
//! bounded semaphore plus a reference count of interested parties), with some
//! logic making sure there aren't any race conditions when records are
//! retired, recycled and readopted concurrently. With
//! [Options::pool_size](crate::Options), retired records are kept in a
//! bounded free list and reused for other keys instead of being reallocated,
//! which pays off when hot keys churn.
//!
//! If the `tokio` feature is enabled (it is by default), this crate also
//! offers [AsyncSemaphorePool] which waits for permits without blocking the
//! thread and whose guards can be held across `await` points, including
//! timeout and cancellation-token variants of every acquisition.

#![deny(missing_docs)]

mod error;
mod guard;
mod options;
mod pool;
mod recycle;
mod releaser;
mod semaphore;

#[cfg(feature = "tokio")]
pub use error::Canceled;
pub use error::OptionsError;
pub use guard::Guard;
pub use options::Options;
#[cfg(feature = "tokio")]
pub use pool::pool_async::{AsyncSemaphorePool, SemaphorePoolAsync};
pub use pool::pool_sync::SyncSemaphorePool;
pub use pool::{SemaphorePool, SemaphorePoolImpl};
pub use semaphore::{SemaphoreImpl, SyncSemaphore};
