use crate::error::OptionsError;

/// Configuration for a semaphore pool.
///
/// The defaults give a mutex-like pool: one permit per key, no releaser
/// recycling. Setters chain:
///
/// ```
/// use semapool::Options;
///
/// let options = Options::default().max_count(4).pool_size(32);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub(crate) max_count: usize,
    pub(crate) pool_size: usize,
    pub(crate) pool_initial_fill: Option<usize>,
    pub(crate) capacity: usize,
    pub(crate) shard_amount: Option<usize>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_count: 1,
            pool_size: 0,
            pool_initial_fill: None,
            capacity: 0,
            shard_amount: None,
        }
    }
}

impl Options {
    /// How many holders of the same key are admitted concurrently.
    /// Default 1. Zero is rejected at construction.
    pub fn max_count(mut self, max_count: usize) -> Self {
        self.max_count = max_count;
        self
    }

    /// How many retired releasers to keep around for reuse. Default 0, which
    /// disables recycling entirely.
    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// How many spare releasers to preallocate. Defaults to `pool_size`.
    /// Values above `pool_size` are rejected at construction.
    pub fn pool_initial_fill(mut self, fill: usize) -> Self {
        self.pool_initial_fill = Some(fill);
        self
    }

    /// Pre-size the index for this many live keys. Default 0.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Estimated concurrency level: how many shards the index is split into.
    /// Rounded up to a power of two. Defaults to the index's own heuristic.
    pub fn shard_amount(mut self, shard_amount: usize) -> Self {
        self.shard_amount = Some(shard_amount);
        self
    }

    pub(crate) fn validate(&self) -> Result<(), OptionsError> {
        if self.max_count == 0 {
            return Err(OptionsError::ZeroMaxCount);
        }
        if let Some(fill) = self.pool_initial_fill {
            if fill > self.pool_size {
                return Err(OptionsError::InitialFillExceedsPoolSize {
                    fill,
                    size: self.pool_size,
                });
            }
        }
        Ok(())
    }

    pub(crate) fn initial_fill(&self) -> usize {
        self.pool_initial_fill.unwrap_or(self.pool_size)
    }
}
