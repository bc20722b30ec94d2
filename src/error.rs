use thiserror::Error;

/// Errors returned when constructing a pool from invalid [Options](crate::Options).
///
/// These are reported before any state is created; a pool that constructs
/// successfully is fully usable.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionsError {
    /// `max_count` was zero. Every key needs at least one permit.
    #[error("max_count must be at least 1")]
    ZeroMaxCount,

    /// `pool_initial_fill` was larger than `pool_size`.
    #[error("pool_initial_fill ({fill}) exceeds pool_size ({size})")]
    InitialFillExceedsPoolSize {
        /// The requested initial fill.
        fill: usize,
        /// The configured pool capacity.
        size: usize,
    },
}

/// Returned by cancelable acquisitions when the cancellation token fired
/// before a permit was granted.
///
/// By the time this error surfaces, the pool has already released the
/// caller's interest in the key; no cleanup is required.
#[cfg(feature = "tokio")]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("lock acquisition was canceled")]
pub struct Canceled;
