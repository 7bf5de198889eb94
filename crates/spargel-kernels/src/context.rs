//! Execution context: configuration plus an owned worker pool.

use rayon::{ThreadPool, ThreadPoolBuilder};
use spargel_core::{alloc, Config, Error, Result};
use std::sync::Arc;

/// Handle passed to every kernel. Cloning shares the pool.
#[derive(Clone)]
pub struct Context {
    config: Config,
    pool: Arc<ThreadPool>,
}

impl Context {
    /// Build a pool of `config.max_threads` workers (0 = one per core).
    pub fn new(config: Config) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.max_threads)
            .thread_name(|i| format!("spargel-worker-{i}"))
            .build()
            .map_err(|e| Error::InvalidObject(format!("cannot build worker pool: {e}")))?;
        tracing::debug!(threads = pool.current_num_threads(), "spargel context ready");
        Ok(Self {
            config,
            pool: Arc::new(pool),
        })
    }

    /// Single-threaded context, handy for deterministic tests.
    pub fn serial() -> Result<Self> {
        Self::new(Config::default().with_max_threads(1))
    }

    #[inline]
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn max_threads(&self) -> usize {
        self.pool.current_num_threads().max(1)
    }

    /// Threads worth using for `work` entries: `min(max_threads, ceil(work / chunk))`.
    #[must_use]
    pub fn nthreads_for(&self, work: usize) -> usize {
        let chunk = self.config.chunk.max(1);
        work.div_ceil(chunk).clamp(1, self.max_threads())
    }

    /// Run `op` on the pool and block until it returns.
    pub fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        self.pool.install(op)
    }

    /// `n` copies of `fill`, honouring the configured memory limit.
    pub fn alloc<T: Clone>(&self, n: usize, fill: T) -> Result<Vec<T>> {
        alloc::try_filled(n, fill, self.config.memory_limit)
    }

    /// Empty vector with room for `n`, honouring the memory limit.
    pub fn alloc_capacity<T>(&self, n: usize) -> Result<Vec<T>> {
        alloc::try_with_capacity(n, self.config.memory_limit)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.config)
            .field("threads", &self.pool.current_num_threads())
            .finish()
    }
}
