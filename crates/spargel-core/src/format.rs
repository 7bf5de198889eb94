//! Physical layout tags

use std::fmt;

/// Physical layout of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// Every cell present; values at `vector * vlen + index`
    Full,
    /// Presence byte per cell plus a dense value array
    Bitmap,
    /// Vector pointers + index array + values
    Sparse,
    /// Sparse plus a list of the non-empty vectors
    Hypersparse,
}

impl Format {
    /// True for the layouts that may hold zombies and pending tuples
    #[inline]
    #[must_use]
    pub const fn is_compressed(self) -> bool {
        matches!(self, Self::Sparse | Self::Hypersparse)
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Bitmap => "bitmap",
            Self::Sparse => "sparse",
            Self::Hypersparse => "hypersparse",
        }
    }

    const fn bit(self) -> u8 {
        match self {
            Self::Hypersparse => 1,
            Self::Sparse => 2,
            Self::Bitmap => 4,
            Self::Full => 8,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Which dimension a container's vectors run along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Orientation {
    /// Vectors are rows (CSR-like)
    #[default]
    ByRow,
    /// Vectors are columns (CSC-like)
    ByCol,
}

impl Orientation {
    #[inline]
    #[must_use]
    pub const fn flip(self) -> Self {
        match self {
            Self::ByRow => Self::ByCol,
            Self::ByCol => Self::ByRow,
        }
    }

    /// Map a logical (row, col) to (vector, index) under this orientation.
    #[inline]
    #[must_use]
    pub const fn to_vector_space(self, row: usize, col: usize) -> (usize, usize) {
        match self {
            Self::ByRow => (row, col),
            Self::ByCol => (col, row),
        }
    }

    /// Inverse of [`Self::to_vector_space`].
    #[inline]
    #[must_use]
    pub const fn to_logical(self, vector: usize, index: usize) -> (usize, usize) {
        match self {
            Self::ByRow => (vector, index),
            Self::ByCol => (index, vector),
        }
    }
}

/// Set of layouts a container is allowed to take when it is conformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SparsityControl(u8);

impl SparsityControl {
    pub const AUTO: Self = Self(0x0F);

    #[must_use]
    pub const fn only(format: Format) -> Self {
        Self(format.bit())
    }

    #[must_use]
    pub const fn with(self, format: Format) -> Self {
        Self(self.0 | format.bit())
    }

    #[inline]
    #[must_use]
    pub const fn allows(self, format: Format) -> bool {
        self.0 & format.bit() != 0
    }
}

impl Default for SparsityControl {
    fn default() -> Self {
        Self::AUTO
    }
}
