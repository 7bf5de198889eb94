//! Tuple import and export.
//!
//! `build` pushes the tuples as pending tuples of an empty container and
//! reconciles them with the caller's dup operator, so duplicates coalesce
//! exactly like buffered insertions do. `extract_tuples` exports a
//! reconciled container in vector order.

use crate::context::Context;
use crate::convert;
use crate::reconcile;
use crate::registry;
use crate::utility::util::{offsets, split_by_counts, SMALL_NNZ_LIMIT};
use rayon::prelude::*;
use spargel_core::{alloc, BinaryOp, DataType, Error, Matrix, Result, Scalar, Storage};

/// Exported entries: parallel arrays of logical coordinates and value bytes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tuples {
    pub rows: Vec<usize>,
    pub cols: Vec<usize>,
    pub x: Vec<u8>,
}

impl Tuples {
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// `nrows x ncols` container of type `ty` from `(rows[t], cols[t], values[t])`.
///
/// Tuples at the same coordinate combine with `dup` in input order; with no
/// `dup` the last one wins. The container is held in the context's default
/// orientation and comes back finalized.
#[allow(clippy::too_many_arguments)]
pub fn build(
    ctx: &Context,
    ty: DataType,
    nrows: usize,
    ncols: usize,
    rows: &[usize],
    cols: &[usize],
    values: &[u8],
    dup: Option<&BinaryOp>,
) -> Result<Matrix> {
    let n = rows.len();
    if cols.len() != n || values.len() != n * ty.size {
        return Err(Error::InvalidObject(format!(
            "tuple arrays disagree: {n} rows, {} cols, {} value bytes",
            cols.len(),
            values.len()
        )));
    }
    if let Some(op) = dup {
        if op.ty != ty {
            return Err(Error::DomainMismatch {
                from: op.ty.name.into(),
                to: ty.name.into(),
            });
        }
        registry::resolve(op)?;
    }
    check_bounds(rows, nrows)?;
    check_bounds(cols, ncols)?;

    let mut c = Matrix::with_orientation(ty, nrows, ncols, ctx.config().default_orientation);
    let orientation = c.orientation;
    let limit = ctx.config().memory_limit;
    let mut vectors = alloc::try_with_capacity::<usize>(n, limit)?;
    let mut indices = alloc::try_with_capacity::<usize>(n, limit)?;
    ctx.install(|| {
        (rows, cols)
            .into_par_iter()
            .map(|(&r, &cl)| orientation.to_vector_space(r, cl))
            .unzip_into_vecs(&mut vectors, &mut indices);
    });
    let sorted = (1..n).all(|t| (vectors[t - 1], indices[t - 1]) < (vectors[t], indices[t]));
    let mut x = alloc::try_with_capacity::<u8>(values.len(), limit)?;
    x.extend_from_slice(values);
    c.pending.vectors = vectors;
    c.pending.indices = indices;
    c.pending.x = x;
    c.pending.sorted = sorted;
    c.pending.dup = dup.cloned();
    tracing::debug!(tuples = n, sorted, "build");
    reconcile::reconcile(ctx, &mut c)?;
    Ok(c)
}

/// Typed [`build`].
pub fn build_from<T: Scalar>(
    ctx: &Context,
    nrows: usize,
    ncols: usize,
    rows: &[usize],
    cols: &[usize],
    values: &[T],
    dup: Option<&BinaryOp>,
) -> Result<Matrix> {
    let size = T::TYPE.size;
    let mut bytes = vec![0u8; values.len() * size];
    for (chunk, &v) in bytes.chunks_exact_mut(size).zip(values) {
        v.write_bytes(chunk);
    }
    build(ctx, T::TYPE, nrows, ncols, rows, cols, &bytes, dup)
}

fn check_bounds(idx: &[usize], dim: usize) -> Result<()> {
    let bad = if idx.len() < SMALL_NNZ_LIMIT {
        idx.iter().copied().find(|&v| v >= dim)
    } else {
        idx.par_iter().copied().find_any(|&v| v >= dim)
    };
    match bad {
        Some(index) => Err(Error::IndexOutOfBounds { index, bound: dim }),
        None => Ok(()),
    }
}

/// Every live entry of `a` as `(row, col, value)` tuples, in vector order.
///
/// Pending work is reconciled on a scratch copy first; `a` is not touched.
pub fn extract_tuples(ctx: &Context, a: &Matrix) -> Result<Tuples> {
    let a = convert::finalized(ctx, a)?;
    let size = a.ty.size;
    let nvec = a.nvec();
    let live_in = |k: usize| -> usize {
        let (s, e) = a.vector_range(k);
        match &a.storage {
            Storage::Bitmap { b } => b[s..e].iter().filter(|&&f| f != 0).count(),
            _ => e - s,
        }
    };
    let counts: Vec<usize> = ctx.install(|| (0..nvec).into_par_iter().map(live_in).collect());
    let nnz = offsets(&counts)[nvec];
    let mut out = Tuples {
        rows: ctx.alloc(nnz, 0usize)?,
        cols: ctx.alloc(nnz, 0usize)?,
        x: ctx.alloc(nnz * size, 0u8)?,
    };
    let idx = a.indices();
    let orientation = a.orientation;
    let rows = split_by_counts(&mut out.rows, &counts, 1);
    let cols = split_by_counts(&mut out.cols, &counts, 1);
    let xs = split_by_counts(&mut out.x, &counts, size);
    ctx.install(|| {
        rows.into_par_iter()
            .zip(cols.into_par_iter())
            .zip(xs.into_par_iter())
            .enumerate()
            .for_each(|(k, ((rk, ck), xk))| {
                let j = a.vector_id(k);
                let (s, e) = a.vector_range(k);
                let mut w = 0usize;
                for p in s..e {
                    let i = match &a.storage {
                        Storage::Sparse { .. } | Storage::Hypersparse { .. } => idx[p].index(),
                        Storage::Bitmap { b } => {
                            if b[p] == 0 {
                                continue;
                            }
                            p - s
                        }
                        Storage::Full => p - s,
                    };
                    (rk[w], ck[w]) = orientation.to_logical(j, i);
                    xk[w * size..(w + 1) * size].copy_from_slice(a.value(p));
                    w += 1;
                }
            });
    });
    tracing::trace!(nnz, "tuples extracted");
    Ok(out)
}

/// Typed [`extract_tuples`].
pub fn extract<T: Scalar>(ctx: &Context, a: &Matrix) -> Result<Vec<(usize, usize, T)>> {
    if a.ty != T::TYPE {
        return Err(Error::DomainMismatch {
            from: a.ty.name.into(),
            to: T::TYPE.name.into(),
        });
    }
    let t = extract_tuples(ctx, a)?;
    let size = T::TYPE.size;
    Ok((0..t.len())
        .map(|q| (t.rows[q], t.cols[q], T::read_bytes(&t.x[q * size..(q + 1) * size])))
        .collect())
}
