//! Map-over-chunks execution for the statistics engine.
//!
//! The engine never owns a global pool: callers hand it an [`Executor`].
//! [`Sequential`] runs chunks on the calling thread; [`ThreadPoolExecutor`]
//! (feature `parallel`) runs them on a dedicated rayon pool. Both return
//! results in chunk order, so the reduction is the same for either.

use std::ops::Range;

#[cfg(feature = "parallel")]
use crate::errors::{GmmError, GmmResult};

/// "Map a pure function over chunks" capability.
pub trait Executor: Sync {
    /// Number of workers; used as the default chunk count.
    fn workers(&self) -> usize;

    /// Applies `f` to every chunk and returns the results in chunk order.
    fn map_chunks<T, F>(&self, chunks: &[Range<usize>], f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(Range<usize>) -> T + Send + Sync;
}

/// Runs every chunk on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sequential;

impl Executor for Sequential {
    fn workers(&self) -> usize {
        1
    }

    fn map_chunks<T, F>(&self, chunks: &[Range<usize>], f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(Range<usize>) -> T + Send + Sync,
    {
        chunks.iter().cloned().map(f).collect()
    }
}

/// Runs chunks on a private rayon thread pool.
#[cfg(feature = "parallel")]
pub struct ThreadPoolExecutor {
    pool: rayon::ThreadPool,
}

#[cfg(feature = "parallel")]
impl ThreadPoolExecutor {
    /// Pool with `workers` threads.
    pub fn new(workers: usize) -> GmmResult<Self> {
        crate::errors::validate_count(workers, 1, "workers")?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("gmm-stats-{}", i))
            .build()
            .map_err(|e| GmmError::ConcurrencyError {
                resource: format!("thread pool with {} workers: {}", workers, e),
            })?;
        Ok(Self { pool })
    }

    /// Pool sized to the available parallelism.
    pub fn with_available_parallelism() -> GmmResult<Self> {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::new(workers)
    }
}

#[cfg(feature = "parallel")]
impl std::fmt::Debug for ThreadPoolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPoolExecutor")
            .field("workers", &self.pool.current_num_threads())
            .finish()
    }
}

#[cfg(feature = "parallel")]
impl Executor for ThreadPoolExecutor {
    fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    fn map_chunks<T, F>(&self, chunks: &[Range<usize>], f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(Range<usize>) -> T + Send + Sync,
    {
        use rayon::prelude::*;
        self.pool
            .install(|| chunks.par_iter().cloned().map(&f).collect())
    }
}

/// Splits `0..len` into `chunks` contiguous ranges whose sizes differ by at most one.
///
/// The chunk count is clamped to `[1, len]`; an empty input gives one empty range.
pub fn partition(len: usize, chunks: usize) -> Vec<Range<usize>> {
    if len == 0 {
        return vec![0..0];
    }
    let chunks = chunks.clamp(1, len);
    let base = len / chunks;
    let extra = len % chunks;
    let mut ranges = Vec::with_capacity(chunks);
    let mut start = 0;
    for c in 0..chunks {
        let size = base + usize::from(c < extra);
        ranges.push(start..start + size);
        start += size;
    }
    ranges
}
