//! Index primitives: tagged row indices and index selections.

use crate::error::{Error, Result};

/// One entry of a compressed index array.
///
/// A `Zombie` keeps its physical position and its index so sorted order is
/// preserved; it is dropped or revived when the container is reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowIndex {
    Live(usize),
    Zombie(usize),
}

impl RowIndex {
    /// The index regardless of liveness
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Live(i) | Self::Zombie(i) => i,
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_zombie(self) -> bool {
        matches!(self, Self::Zombie(_))
    }

    #[inline]
    #[must_use]
    pub const fn kill(self) -> Self {
        Self::Zombie(self.index())
    }

    #[inline]
    #[must_use]
    pub const fn revive(self) -> Self {
        Self::Live(self.index())
    }
}

/// Binary search for `target` in a slice sorted by index; zombies compare
/// by their index so they can be found (and revived).
#[inline]
#[must_use]
pub fn search(indices: &[RowIndex], target: usize) -> Option<usize> {
    indices
        .binary_search_by(|e| e.index().cmp(&target))
        .ok()
}

/// Row or column selection for masked updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexList {
    /// Every index of the dimension
    All,
    /// `start..end`
    Range { start: usize, end: usize },
    /// `start, start+step, ...` while `< end`
    Stride { start: usize, end: usize, step: usize },
    /// Explicit indices; must be unique
    List(Vec<usize>),
}

impl IndexList {
    /// Number of selected indices against a dimension of size `dim`.
    #[must_use]
    pub fn len(&self, dim: usize) -> usize {
        match self {
            Self::All => dim,
            Self::Range { start, end } => end.saturating_sub(*start),
            Self::Stride { start, end, step } => {
                if *step == 0 || end <= start {
                    0
                } else {
                    (end - start).div_ceil(*step)
                }
            }
            Self::List(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self, dim: usize) -> bool {
        self.len(dim) == 0
    }

    /// The k-th selected index.
    #[inline]
    #[must_use]
    pub fn get(&self, k: usize) -> usize {
        match self {
            Self::All => k,
            Self::Range { start, .. } => start + k,
            Self::Stride { start, step, .. } => start + k * step,
            Self::List(v) => v[k],
        }
    }

    /// Check the selection against a dimension of size `dim`.
    pub fn validate(&self, dim: usize) -> Result<()> {
        match self {
            Self::All => Ok(()),
            Self::Range { start, end } => {
                if end > start && *end > dim {
                    return Err(Error::IndexOutOfBounds {
                        index: end - 1,
                        bound: dim,
                    });
                }
                Ok(())
            }
            Self::Stride { start, step, .. } => {
                if *step == 0 {
                    return Err(Error::InvalidIndex("stride step must be positive".into()));
                }
                let n = self.len(dim);
                if n > 0 {
                    let last = start + (n - 1) * step;
                    if last >= dim {
                        return Err(Error::IndexOutOfBounds {
                            index: last,
                            bound: dim,
                        });
                    }
                }
                Ok(())
            }
            Self::List(v) => {
                if let Some(&index) = v.iter().find(|&&i| i >= dim) {
                    return Err(Error::IndexOutOfBounds { index, bound: dim });
                }
                if v.windows(2).all(|w| w[0] < w[1]) {
                    return Ok(());
                }
                // dim may be far larger than the list; sort a copy instead
                let mut sorted = v.clone();
                sorted.sort_unstable();
                match sorted.windows(2).find(|w| w[0] == w[1]) {
                    Some(w) => Err(Error::InvalidIndex(format!("duplicate index {}", w[0]))),
                    None => Ok(()),
                }
            }
        }
    }
}
