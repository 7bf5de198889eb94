//! Engine configuration.
//!
//! A `Config` is plain data handed to the kernel `Context` at construction.
//! Nothing here is process-global.

use crate::format::Orientation;

/// Default fraction of non-empty vectors below which sparse becomes hypersparse
pub const HYPER_SWITCH_DEFAULT: f64 = 0.0625;
/// Default density above which a dense layout (bitmap) is preferred
pub const BITMAP_SWITCH_DEFAULT: f64 = 0.10;
/// Default minimum amount of work (entries) given to one thread
pub const CHUNK_DEFAULT: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Upper bound on worker threads; 0 means "all available cores"
    pub max_threads: usize,
    /// Minimum entries of work per thread before another thread is added
    pub chunk: usize,
    /// Fraction of non-empty vectors at or below which a sparse container is
    /// held hypersparse; it only goes back to sparse above twice this fraction
    pub hyper_switch: f64,
    /// Density at or above which a dense layout (bitmap) is picked when the
    /// sparsity control forces a choice
    pub bitmap_switch: f64,
    /// Optional cap in bytes on any single allocation made by the kernels
    pub memory_limit: Option<usize>,
    /// Orientation of containers created by the kernels without a template
    pub default_orientation: Orientation,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_threads: 0,
            chunk: CHUNK_DEFAULT,
            hyper_switch: HYPER_SWITCH_DEFAULT,
            bitmap_switch: BITMAP_SWITCH_DEFAULT,
            memory_limit: None,
            default_orientation: Orientation::ByRow,
        }
    }
}

impl Config {
    /// Defaults overridden by `SPARGEL_NUM_THREADS`, `SPARGEL_CHUNK` and
    /// `SPARGEL_MEMORY_LIMIT` when they parse.
    #[must_use]
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(n) = env_usize("SPARGEL_NUM_THREADS") {
            cfg.max_threads = n;
        }
        if let Some(c) = env_usize("SPARGEL_CHUNK") {
            cfg.chunk = c.max(1);
        }
        if let Some(limit) = env_usize("SPARGEL_MEMORY_LIMIT") {
            cfg.memory_limit = Some(limit);
        }
        cfg
    }

    #[must_use]
    pub const fn with_max_threads(mut self, n: usize) -> Self {
        self.max_threads = n;
        self
    }

    #[must_use]
    pub fn with_chunk(mut self, chunk: usize) -> Self {
        self.chunk = chunk.max(1);
        self
    }

    #[must_use]
    pub const fn with_hyper_switch(mut self, s: f64) -> Self {
        self.hyper_switch = s;
        self
    }

    #[must_use]
    pub const fn with_bitmap_switch(mut self, s: f64) -> Self {
        self.bitmap_switch = s;
        self
    }

    #[must_use]
    pub const fn with_memory_limit(mut self, bytes: Option<usize>) -> Self {
        self.memory_limit = bytes;
        self
    }

    #[must_use]
    pub const fn with_default_orientation(mut self, o: Orientation) -> Self {
        self.default_orientation = o;
        self
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok()?.trim().parse().ok()
}
