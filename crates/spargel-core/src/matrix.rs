//! The sparse container and its four physical layouts

use crate::alloc;
use crate::error::{Error, Result};
use crate::format::{Format, Orientation, SparsityControl};
use crate::index::{self, RowIndex};
use crate::pending::Pending;
use crate::types::{DataType, Scalar};

/// Index structure of a container; values live in [`Matrix::x`].
#[derive(Debug, Clone, PartialEq)]
pub enum Storage {
    Full,
    Bitmap {
        /// One presence byte per cell, `vdim * vlen` long
        b: Vec<u8>,
    },
    Sparse {
        /// Vector pointers, `vdim + 1` long
        p: Vec<usize>,
        i: Vec<RowIndex>,
    },
    Hypersparse {
        /// Ids of the vectors held, strictly increasing
        h: Vec<usize>,
        /// Pointers into `i`, `h.len() + 1` long
        p: Vec<usize>,
        i: Vec<RowIndex>,
    },
}

/// A matrix (or a vector: `vdim == 1`, by column) of type-erased values.
///
/// Vectors run along rows for [`Orientation::ByRow`] and along columns for
/// [`Orientation::ByCol`]; `vlen` is the vector length and `vdim` the
/// number of vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    pub vlen: usize,
    pub vdim: usize,
    pub orientation: Orientation,
    pub ty: DataType,
    pub storage: Storage,
    /// Values: one per held entry (or per cell for bitmap/full), or exactly
    /// one value when `iso` is set
    pub x: Vec<u8>,
    /// Every present entry has the value `x[..ty.size]`
    pub iso: bool,
    /// Number of set presence bytes (bitmap only)
    pub nvals: usize,
    pub nzombies: usize,
    pub pending: Pending,
    pub sparsity: SparsityControl,
}

impl Matrix {
    /// Empty `nrows x ncols` container, held by row.
    #[must_use]
    pub fn new(ty: DataType, nrows: usize, ncols: usize) -> Self {
        Self::with_orientation(ty, nrows, ncols, Orientation::ByRow)
    }

    /// Empty container with an explicit orientation.
    #[must_use]
    pub fn with_orientation(ty: DataType, nrows: usize, ncols: usize, orientation: Orientation) -> Self {
        let (vdim, vlen) = orientation.to_vector_space(nrows, ncols);
        let storage = if vdim > 1 {
            Storage::Hypersparse {
                h: Vec::new(),
                p: vec![0],
                i: Vec::new(),
            }
        } else {
            Storage::Sparse {
                p: vec![0; vdim + 1],
                i: Vec::new(),
            }
        };
        Self {
            vlen,
            vdim,
            orientation,
            ty,
            storage,
            x: Vec::new(),
            iso: false,
            nvals: 0,
            nzombies: 0,
            pending: Pending::new(),
            sparsity: SparsityControl::AUTO,
        }
    }

    /// Empty column vector of length `n`.
    #[must_use]
    pub fn vector(ty: DataType, n: usize) -> Self {
        Self::with_orientation(ty, n, 1, Orientation::ByCol)
    }

    /// Sparse container from raw parts (`i` as plain indices).
    #[allow(clippy::too_many_arguments)]
    pub fn from_sparse_parts(
        ty: DataType,
        nrows: usize,
        ncols: usize,
        orientation: Orientation,
        p: Vec<usize>,
        i: Vec<usize>,
        x: Vec<u8>,
        check: bool,
    ) -> Result<Self> {
        let (vdim, vlen) = orientation.to_vector_space(nrows, ncols);
        if p.len() != vdim + 1 {
            return Err(Error::InvalidObject("p length must be vdim + 1".into()));
        }
        validate_compressed(vlen, &p, &i, x.len(), ty.size, check)?;
        let mut m = Self::with_orientation(ty, nrows, ncols, orientation);
        m.storage = Storage::Sparse {
            p,
            i: i.into_iter().map(RowIndex::Live).collect(),
        };
        m.x = x;
        Ok(m)
    }

    /// Hypersparse container from raw parts.
    #[allow(clippy::too_many_arguments)]
    pub fn from_hyper_parts(
        ty: DataType,
        nrows: usize,
        ncols: usize,
        orientation: Orientation,
        h: Vec<usize>,
        p: Vec<usize>,
        i: Vec<usize>,
        x: Vec<u8>,
        check: bool,
    ) -> Result<Self> {
        let (vdim, vlen) = orientation.to_vector_space(nrows, ncols);
        if p.len() != h.len() + 1 {
            return Err(Error::InvalidObject("p length must be nvec + 1".into()));
        }
        if check {
            for w in h.windows(2) {
                if w[0] >= w[1] {
                    return Err(Error::InvalidObject("hyperlist must be strictly increasing".into()));
                }
            }
            if h.last().is_some_and(|&j| j >= vdim) {
                return Err(Error::InvalidObject("hyperlist entry out of bounds".into()));
            }
        }
        validate_compressed(vlen, &p, &i, x.len(), ty.size, check)?;
        let mut m = Self::with_orientation(ty, nrows, ncols, orientation);
        m.storage = Storage::Hypersparse {
            h,
            p,
            i: i.into_iter().map(RowIndex::Live).collect(),
        };
        m.x = x;
        Ok(m)
    }

    /// Bitmap container; `b` and `x` are cell-indexed.
    pub fn from_bitmap_parts(
        ty: DataType,
        nrows: usize,
        ncols: usize,
        orientation: Orientation,
        b: Vec<u8>,
        x: Vec<u8>,
    ) -> Result<Self> {
        let (vdim, vlen) = orientation.to_vector_space(nrows, ncols);
        let cells = alloc::cell_count(vlen, vdim)?;
        if b.len() != cells {
            return Err(Error::InvalidObject("bitmap length must be nrows * ncols".into()));
        }
        if x.len() != cells * ty.size {
            return Err(Error::InvalidObject("value array must hold one value per cell".into()));
        }
        let nvals = b.iter().filter(|&&f| f != 0).count();
        let mut m = Self::with_orientation(ty, nrows, ncols, orientation);
        m.storage = Storage::Bitmap { b };
        m.x = x;
        m.nvals = nvals;
        Ok(m)
    }

    /// Full container; `x` holds one value per cell in vector order.
    pub fn from_dense(ty: DataType, nrows: usize, ncols: usize, orientation: Orientation, x: Vec<u8>) -> Result<Self> {
        let (vdim, vlen) = orientation.to_vector_space(nrows, ncols);
        let cells = alloc::cell_count(vlen, vdim)?;
        if x.len() != cells * ty.size {
            return Err(Error::InvalidObject("value array must hold one value per cell".into()));
        }
        let mut m = Self::with_orientation(ty, nrows, ncols, orientation);
        m.storage = Storage::Full;
        m.x = x;
        Ok(m)
    }

    /// Full container from typed values listed in vector order.
    pub fn from_dense_values<T: Scalar>(nrows: usize, ncols: usize, orientation: Orientation, values: &[T]) -> Result<Self> {
        let size = T::TYPE.size;
        let mut x = vec![0u8; values.len() * size];
        for (chunk, &v) in x.chunks_exact_mut(size).zip(values) {
            v.write_bytes(chunk);
        }
        Self::from_dense(T::TYPE, nrows, ncols, orientation, x)
    }

    /// Full container where every cell holds `value`.
    pub fn full_iso<T: Scalar>(nrows: usize, ncols: usize, orientation: Orientation, value: T) -> Result<Self> {
        let (vdim, vlen) = orientation.to_vector_space(nrows, ncols);
        alloc::cell_count(vlen, vdim)?;
        let mut m = Self::with_orientation(T::TYPE, nrows, ncols, orientation);
        m.storage = Storage::Full;
        m.x = value.to_bytes();
        m.iso = true;
        Ok(m)
    }

    #[inline]
    #[must_use]
    pub const fn nrows(&self) -> usize {
        self.orientation.to_logical(self.vdim, self.vlen).0
    }

    #[inline]
    #[must_use]
    pub const fn ncols(&self) -> usize {
        self.orientation.to_logical(self.vdim, self.vlen).1
    }

    #[inline]
    #[must_use]
    pub const fn shape(&self) -> (usize, usize) {
        self.orientation.to_logical(self.vdim, self.vlen)
    }

    /// Classify the current physical layout.
    #[inline]
    #[must_use]
    pub const fn format(&self) -> Format {
        match self.storage {
            Storage::Full => Format::Full,
            Storage::Bitmap { .. } => Format::Bitmap,
            Storage::Sparse { .. } => Format::Sparse,
            Storage::Hypersparse { .. } => Format::Hypersparse,
        }
    }

    /// Physical entries held, zombies included, pending tuples excluded.
    #[must_use]
    pub fn entries_held(&self) -> usize {
        match &self.storage {
            Storage::Full => self.vlen * self.vdim,
            Storage::Bitmap { .. } => self.nvals,
            Storage::Sparse { i, .. } | Storage::Hypersparse { i, .. } => i.len(),
        }
    }

    /// Number of vectors in the index structure.
    #[inline]
    #[must_use]
    pub fn nvec(&self) -> usize {
        match &self.storage {
            Storage::Hypersparse { h, .. } => h.len(),
            _ => self.vdim,
        }
    }

    /// Vectors holding at least one physical entry.
    #[must_use]
    pub fn nvec_nonempty(&self) -> usize {
        match &self.storage {
            Storage::Full => {
                if self.vlen > 0 {
                    self.vdim
                } else {
                    0
                }
            }
            Storage::Bitmap { b } => {
                if self.vlen == 0 {
                    return 0;
                }
                b.chunks_exact(self.vlen).filter(|v| v.iter().any(|&f| f != 0)).count()
            }
            Storage::Sparse { p, .. } | Storage::Hypersparse { p, .. } => {
                p.windows(2).filter(|w| w[1] > w[0]).count()
            }
        }
    }

    /// Id of the k-th vector held.
    #[inline]
    #[must_use]
    pub fn vector_id(&self, k: usize) -> usize {
        match &self.storage {
            Storage::Hypersparse { h, .. } => h[k],
            _ => k,
        }
    }

    /// Physical position range of the k-th vector held.
    #[inline]
    #[must_use]
    pub fn vector_range(&self, k: usize) -> (usize, usize) {
        match &self.storage {
            Storage::Sparse { p, .. } | Storage::Hypersparse { p, .. } => (p[k], p[k + 1]),
            _ => (k * self.vlen, (k + 1) * self.vlen),
        }
    }

    /// Position k in the vector list of vector id `j`, if held.
    #[inline]
    #[must_use]
    pub fn find_vector(&self, j: usize) -> Option<usize> {
        match &self.storage {
            Storage::Hypersparse { h, .. } => h.binary_search(&j).ok(),
            _ => (j < self.vdim).then_some(j),
        }
    }

    /// Bytes of the value at physical position `p`.
    #[inline]
    #[must_use]
    pub fn value(&self, p: usize) -> &[u8] {
        let size = self.ty.size;
        if self.iso {
            &self.x[..size]
        } else {
            &self.x[p * size..(p + 1) * size]
        }
    }

    #[inline]
    #[must_use]
    pub const fn zombie_count(&self) -> usize {
        self.nzombies
    }

    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// No zombies and no pending tuples.
    #[inline]
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.nzombies == 0 && self.pending.is_empty()
    }

    /// True when every cell holds an entry and nothing is pending.
    #[must_use]
    pub fn is_fully_populated(&self) -> bool {
        self.is_finalized() && self.entries_held() == self.vlen * self.vdim
    }

    /// Bytes owned by the index and value arrays.
    #[must_use]
    pub fn physical_size(&self) -> usize {
        let word = std::mem::size_of::<usize>();
        let idx = std::mem::size_of::<RowIndex>();
        let structure = match &self.storage {
            Storage::Full => 0,
            Storage::Bitmap { b } => b.len(),
            Storage::Sparse { p, i } => p.len() * word + i.len() * idx,
            Storage::Hypersparse { h, p, i } => (h.len() + p.len()) * word + i.len() * idx,
        };
        let pending = self.pending.len() * 2 * word + self.pending.x.len();
        structure + self.x.len() + pending
    }

    /// Live entry count; requires a finalized container.
    pub fn nvals_finalized(&self) -> Result<usize> {
        if !self.is_finalized() {
            return Err(Error::PendingWork);
        }
        Ok(self.entries_held())
    }

    fn check_coordinate(&self, row: usize, col: usize) -> Result<(usize, usize)> {
        let (nrows, ncols) = self.shape();
        if row >= nrows {
            return Err(Error::IndexOutOfBounds { index: row, bound: nrows });
        }
        if col >= ncols {
            return Err(Error::IndexOutOfBounds { index: col, bound: ncols });
        }
        Ok(self.orientation.to_vector_space(row, col))
    }

    /// Physical position of `(row, col)` and whether it is a zombie.
    ///
    /// Ignores pending tuples; binary search is valid with zombies present
    /// because they keep their index.
    pub fn locate(&self, row: usize, col: usize) -> Result<Option<(usize, bool)>> {
        let (j, i) = self.check_coordinate(row, col)?;
        Ok(self.locate_in_vector(j, i))
    }

    /// Same as [`Self::locate`] but in vector space.
    #[must_use]
    pub fn locate_in_vector(&self, j: usize, i: usize) -> Option<(usize, bool)> {
        match &self.storage {
            Storage::Full => Some((j * self.vlen + i, false)),
            Storage::Bitmap { b } => {
                let p = j * self.vlen + i;
                (b[p] != 0).then_some((p, false))
            }
            Storage::Sparse { .. } | Storage::Hypersparse { .. } => {
                let k = self.find_vector(j)?;
                let (start, end) = self.vector_range(k);
                let idx = self.indices();
                if end - start == self.vlen {
                    let p = start + i;
                    return Some((p, idx[p].is_zombie()));
                }
                index::search(&idx[start..end], i).map(|off| (start + off, idx[start + off].is_zombie()))
            }
        }
    }

    /// Compressed index array (empty for bitmap/full).
    #[inline]
    #[must_use]
    pub fn indices(&self) -> &[RowIndex] {
        match &self.storage {
            Storage::Sparse { i, .. } | Storage::Hypersparse { i, .. } => i,
            _ => &[],
        }
    }

    /// Raw bytes of `(row, col)` from canonical storage; zombies read as absent.
    pub fn get_bytes(&self, row: usize, col: usize) -> Result<Option<&[u8]>> {
        if !self.pending.is_empty() {
            return Err(Error::PendingWork);
        }
        Ok(match self.locate(row, col)? {
            Some((p, false)) => Some(self.value(p)),
            _ => None,
        })
    }

    /// Typed read of `(row, col)`; the type must match the container's.
    pub fn get<T: Scalar>(&self, row: usize, col: usize) -> Result<Option<T>> {
        if T::TYPE != self.ty {
            return Err(Error::DomainMismatch {
                from: self.ty.name.into(),
                to: T::TYPE.name.into(),
            });
        }
        Ok(self.get_bytes(row, col)?.map(T::read_bytes))
    }

    /// Replace the single uniform value with one value per held slot.
    pub fn expand_iso(&mut self, limit: Option<usize>) -> Result<()> {
        if !self.iso {
            return Ok(());
        }
        let slots = match &self.storage {
            Storage::Full | Storage::Bitmap { .. } => alloc::cell_count(self.vlen, self.vdim)?,
            Storage::Sparse { i, .. } | Storage::Hypersparse { i, .. } => i.len(),
        };
        let size = self.ty.size;
        let mut x = alloc::try_with_capacity::<u8>(slots * size, limit)?;
        let value = self.x[..size].to_vec();
        for _ in 0..slots {
            x.extend_from_slice(&value);
        }
        self.x = x;
        self.iso = false;
        Ok(())
    }

    /// Drop all entries and pending work, keeping type, shape and orientation.
    pub fn clear(&mut self) {
        let sparsity = self.sparsity;
        let (nrows, ncols) = self.shape();
        *self = Self::with_orientation(self.ty, nrows, ncols, self.orientation);
        self.sparsity = sparsity;
    }
}

fn validate_compressed(vlen: usize, p: &[usize], i: &[usize], xlen: usize, size: usize, check: bool) -> Result<()> {
    let nnz = i.len();
    if xlen != nnz * size {
        return Err(Error::InvalidObject("value array must hold one value per entry".into()));
    }
    if p.last().copied().unwrap_or(0) != nnz {
        return Err(Error::InvalidObject("p last element must equal nnz".into()));
    }
    if p.first().copied().unwrap_or(0) != 0 {
        return Err(Error::InvalidObject("p first element must be 0".into()));
    }
    if check {
        for w in p.windows(2) {
            if w[0] > w[1] {
                return Err(Error::InvalidObject("p must be non-decreasing".into()));
            }
            let mut prev: Option<usize> = None;
            for &k in &i[w[0]..w[1]] {
                if k >= vlen {
                    return Err(Error::InvalidObject("index out of bounds".into()));
                }
                if prev.is_some_and(|q| k <= q) {
                    return Err(Error::InvalidObject(
                        "indices must be strictly increasing within each vector".into(),
                    ));
                }
                prev = Some(k);
            }
        }
    }
    Ok(())
}
