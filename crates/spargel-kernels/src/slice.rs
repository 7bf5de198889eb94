//! Task slicer: split a ragged vector structure into balanced units of work.
//!
//! A coarse task owns whole vectors `kfirst..klast`. A fine task owns the
//! sub-range `pfirst..plast` of the single vector `kfirst` and exists only
//! for vectors longer than the per-task target. Tasks come out in entry
//! order and partition `0..nnz` exactly.

use crate::context::Context;
use spargel_core::{Matrix, Storage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskDesc {
    pub kfirst: usize,
    /// One past the last vector; `kfirst + 1` for fine tasks
    pub klast: usize,
    pub pfirst: usize,
    pub plast: usize,
    pub fine: bool,
}

impl TaskDesc {
    #[inline]
    #[must_use]
    pub const fn entries(&self) -> usize {
        self.plast - self.pfirst
    }

    /// Entry range of vector `k` restricted to this task.
    #[inline]
    #[must_use]
    pub fn clip(&self, k: usize, p: Pointers<'_>) -> (usize, usize) {
        if self.fine {
            (self.pfirst, self.plast)
        } else {
            (p.at(k), p.at(k + 1))
        }
    }
}

/// Vector boundaries of a container. Bitmap and full layouts are described
/// arithmetically, so no `nvec + 1` array is built for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pointers<'a> {
    /// A real pointer array, `nvec + 1` long with `p[0] == 0`
    Explicit(&'a [usize]),
    /// `nvec` vectors of `vlen` cells each
    Uniform { nvec: usize, vlen: usize },
}

impl<'a> Pointers<'a> {
    /// Pointers of any container; bitmap and full cells count as entries.
    #[must_use]
    pub fn of(m: &'a Matrix) -> Self {
        match &m.storage {
            Storage::Sparse { p, .. } | Storage::Hypersparse { p, .. } => Self::Explicit(p),
            Storage::Full | Storage::Bitmap { .. } => Self::Uniform {
                nvec: m.vdim,
                vlen: m.vlen,
            },
        }
    }

    #[inline]
    #[must_use]
    pub fn nvec(&self) -> usize {
        match *self {
            Self::Explicit(p) => p.len().saturating_sub(1),
            Self::Uniform { nvec, .. } => nvec,
        }
    }

    /// Start of vector `k` (`at(nvec)` is the entry count).
    #[inline]
    #[must_use]
    pub fn at(&self, k: usize) -> usize {
        match *self {
            Self::Explicit(p) => p[k],
            Self::Uniform { vlen, .. } => k * vlen,
        }
    }

    #[inline]
    #[must_use]
    pub fn nnz(&self) -> usize {
        match *self {
            Self::Explicit(p) => p.last().copied().unwrap_or(0),
            Self::Uniform { nvec, vlen } => nvec * vlen,
        }
    }

    /// How many of the boundaries `lo..=hi` lie within `target` entries of `base`.
    fn within(&self, lo: usize, hi: usize, base: usize, target: usize) -> usize {
        let (mut a, mut b) = (lo, hi + 1);
        while a < b {
            let mid = a + (b - a) / 2;
            if self.at(mid) - base <= target {
                a = mid + 1;
            } else {
                b = mid;
            }
        }
        a.saturating_sub(lo)
    }
}

impl<'a> From<&'a [usize]> for Pointers<'a> {
    fn from(p: &'a [usize]) -> Self {
        Self::Explicit(p)
    }
}

/// Slice a vector pointer array (`nvec + 1` long, `p[0] == 0`) into about
/// `ntasks` tasks of at most `ceil(nnz / ntasks)` entries each.
#[must_use]
pub fn slice_pointers(p: &[usize], ntasks: usize) -> Vec<TaskDesc> {
    slice_impl(Pointers::Explicit(p), ntasks, true)
}

/// Like [`slice_pointers`] but never splits a vector: a long vector becomes
/// a coarse task of its own.
#[must_use]
pub fn slice_pointers_coarse(p: &[usize], ntasks: usize) -> Vec<TaskDesc> {
    slice_impl(Pointers::Explicit(p), ntasks, false)
}

fn slice_impl(p: Pointers<'_>, ntasks: usize, allow_fine: bool) -> Vec<TaskDesc> {
    let nvec = p.nvec();
    let nnz = p.nnz();
    let whole = TaskDesc {
        kfirst: 0,
        klast: nvec,
        pfirst: 0,
        plast: nnz,
        fine: false,
    };
    if nvec == 0 || nnz == 0 || ntasks <= 1 {
        return vec![whole];
    }
    let target = nnz.div_ceil(ntasks);
    let mut tasks = Vec::with_capacity(ntasks + nvec.min(ntasks));
    let mut k = 0usize;
    while k < nvec {
        let base = p.at(k);
        let len = p.at(k + 1) - base;
        if len > target && allow_fine {
            // evenly spaced cut points inside one long vector
            let pieces = len.div_ceil(target);
            for s in 0..pieces {
                tasks.push(TaskDesc {
                    kfirst: k,
                    klast: k + 1,
                    pfirst: base + s * len / pieces,
                    plast: base + (s + 1) * len / pieces,
                    fine: true,
                });
            }
            k += 1;
            continue;
        }
        // furthest vector boundary still within the target
        let kend = if len > target {
            k + 1
        } else {
            k + 1 + p.within(k + 2, nvec, base, target)
        };
        tasks.push(TaskDesc {
            kfirst: k,
            klast: kend,
            pfirst: base,
            plast: p.at(kend),
            fine: false,
        });
        k = kend;
    }
    debug_assert!(tasks.windows(2).all(|w| w[0].plast == w[1].pfirst));
    debug_assert_eq!(tasks.last().map(|t| t.plast), Some(nnz));
    tasks
}

/// Slice `m` into `ntasks` tasks.
#[must_use]
pub fn slice(m: &Matrix, ntasks: usize) -> Vec<TaskDesc> {
    slice_impl(Pointers::of(m), ntasks, true)
}

/// Slice `m` for the threads the context would give this much work.
///
/// Several tasks per thread smooth out imbalance when vectors are ragged.
#[must_use]
pub fn slice_for(ctx: &Context, m: &Matrix, allow_fine: bool) -> Vec<TaskDesc> {
    let p = Pointers::of(m);
    let nthreads = ctx.nthreads_for(p.nnz());
    let ntasks = if nthreads == 1 { 1 } else { nthreads * 4 };
    slice_impl(p, ntasks, allow_fine)
}
