//! Deferred-mutation ledger: zombies and pending tuples.
//!
//! Single-entry updates (`set_element`, `remove_element`) and the building
//! blocks the parallel kernels use to append pending tuples without locks:
//! each task counts its insertions, the counts are prefix-summed, and every
//! task then writes into its own disjoint slice of the pending arrays.

use crate::cast::caster;
use crate::context::Context;
use crate::convert;
use crate::reconcile;
use crate::utility::util::split_by_counts;
use spargel_core::{alloc, BinaryOp, DataType, Error, Format, Matrix, Pending, Result, Scalar, Storage};

/// Append one pending tuple at logical `(row, col)`.
///
/// Only sparse and hypersparse containers buffer insertions; bitmap and full
/// containers are written directly by [`set_element`].
pub fn append_pending(c: &mut Matrix, row: usize, col: usize, value: &[u8]) -> Result<()> {
    let (j, i) = check(c, row, col)?;
    if !c.format().is_compressed() {
        return Err(Error::InvalidObject(format!(
            "{} container cannot buffer pending tuples",
            c.format()
        )));
    }
    if value.len() != c.ty.size {
        return Err(Error::InvalidObject(format!(
            "value must be {} bytes, got {}",
            c.ty.size,
            value.len()
        )));
    }
    c.pending.push(j, i, value);
    Ok(())
}

/// Mark the entry at physical position `p` deleted. Returns false if it
/// already was a zombie or `p` holds no entry.
pub fn mark_zombie(c: &mut Matrix, p: usize) -> bool {
    let (Storage::Sparse { i, .. } | Storage::Hypersparse { i, .. }) = &mut c.storage else {
        return false;
    };
    let Some(slot) = i.get_mut(p) else {
        return false;
    };
    if slot.is_zombie() {
        return false;
    }
    *slot = slot.kill();
    c.nzombies += 1;
    true
}

/// Bring an existing zombie at `p` back to life. Returns false if it was
/// live or `p` holds no entry.
pub fn undelete(c: &mut Matrix, p: usize) -> bool {
    let (Storage::Sparse { i, .. } | Storage::Hypersparse { i, .. }) = &mut c.storage else {
        return false;
    };
    let Some(slot) = i.get_mut(p) else {
        return false;
    };
    if !slot.is_zombie() {
        return false;
    }
    *slot = slot.revive();
    c.nzombies -= 1;
    true
}

/// Make `dup` the pending dup operator, reconciling first if tuples already
/// buffered were meant for a different one.
pub fn ensure_dup(ctx: &Context, c: &mut Matrix, dup: Option<&BinaryOp>) -> Result<()> {
    if !c.pending.is_empty() && c.pending.dup.as_ref() != dup {
        tracing::debug!(
            old = c.pending.dup.as_ref().map(BinaryOp::name),
            new = dup.map(BinaryOp::name),
            "dup operator changed, reconciling"
        );
        reconcile::reconcile(ctx, c)?;
    }
    c.pending.dup = dup.cloned();
    Ok(())
}

/// `C(row, col) = value`, cast to the container's type.
pub fn set_element<T: Scalar>(ctx: &Context, c: &mut Matrix, row: usize, col: usize, value: T) -> Result<()> {
    let bytes = value.to_bytes();
    set_element_bytes(ctx, c, row, col, &bytes, &T::TYPE)
}

/// `C(row, col) = value` where `value` is one element of type `ty`.
pub fn set_element_bytes(
    ctx: &Context,
    c: &mut Matrix,
    row: usize,
    col: usize,
    value: &[u8],
    ty: &DataType,
) -> Result<()> {
    let (j, i) = check(c, row, col)?;
    let cst = caster(&c.ty, ty)?;
    let size = c.ty.size;
    let mut v = vec![0u8; size];
    cst.one(&mut v, value);

    let found = c.locate_in_vector(j, i);
    let writes_in_place = !c.format().is_compressed() || found.is_some();
    if writes_in_place && c.iso && !c.ty.values_equal(&c.x[..size], &v) {
        c.expand_iso(ctx.config().memory_limit)?;
    }
    match c.format() {
        Format::Full => {
            let p = j * c.vlen + i;
            write_value(c, p, &v);
        }
        Format::Bitmap => {
            let p = j * c.vlen + i;
            if let Storage::Bitmap { b } = &mut c.storage {
                if b[p] == 0 {
                    b[p] = 1;
                    c.nvals += 1;
                }
            }
            write_value(c, p, &v);
        }
        Format::Sparse | Format::Hypersparse => match found {
            Some((p, zombie)) => {
                if zombie {
                    undelete(c, p);
                }
                write_value(c, p, &v);
            }
            None => {
                ensure_dup(ctx, c, None)?;
                c.pending.push(j, i, &v);
            }
        },
    }
    Ok(())
}

/// Delete `C(row, col)` if present.
///
/// Sparse entries become zombies; a full container becomes bitmap first.
/// Pending tuples are reconciled beforehand so a buffered insertion at the
/// same coordinate is deleted too.
pub fn remove_element(ctx: &Context, c: &mut Matrix, row: usize, col: usize) -> Result<()> {
    let (j, i) = check(c, row, col)?;
    if !c.pending.is_empty() {
        reconcile::reconcile(ctx, c)?;
    }
    if c.format() == Format::Full {
        convert::ensure_format(ctx, c, Format::Bitmap)?;
    }
    if c.format().is_compressed() {
        if let Some((p, false)) = c.locate_in_vector(j, i) {
            mark_zombie(c, p);
        }
    } else if let Storage::Bitmap { b } = &mut c.storage {
        let p = j * c.vlen + i;
        if b[p] != 0 {
            b[p] = 0;
            c.nvals -= 1;
        }
    }
    Ok(())
}

fn write_value(c: &mut Matrix, p: usize, v: &[u8]) {
    let size = c.ty.size;
    if c.iso {
        return;
    }
    c.x[p * size..(p + 1) * size].copy_from_slice(v);
}

fn check(c: &Matrix, row: usize, col: usize) -> Result<(usize, usize)> {
    let (nrows, ncols) = c.shape();
    if row >= nrows {
        return Err(Error::IndexOutOfBounds { index: row, bound: nrows });
    }
    if col >= ncols {
        return Err(Error::IndexOutOfBounds { index: col, bound: ncols });
    }
    Ok(c.orientation.to_vector_space(row, col))
}

/// One task's disjoint window into the pending arrays.
#[derive(Debug)]
pub struct PendingSlots<'a> {
    pub vectors: &'a mut [usize],
    pub indices: &'a mut [usize],
    pub x: &'a mut [u8],
    len: usize,
    size: usize,
}

impl PendingSlots<'_> {
    /// Write the next tuple of this task.
    #[inline]
    pub fn push(&mut self, vector: usize, index: usize, value: &[u8]) {
        let w = self.len;
        self.vectors[w] = vector;
        self.indices[w] = index;
        self.x[w * self.size..(w + 1) * self.size].copy_from_slice(&value[..self.size]);
        self.len += 1;
    }

    #[inline]
    #[must_use]
    pub const fn filled(&self) -> usize {
        self.len
    }
}

/// Grow `pending` by `sum(counts)` tuples and hand back one window per task,
/// in task order. The growth is all-or-nothing.
pub fn reserve_slots<'a>(
    ctx: &Context,
    pending: &'a mut Pending,
    size: usize,
    counts: &[usize],
) -> Result<Vec<PendingSlots<'a>>> {
    let total: usize = counts.iter().sum();
    let limit = ctx.config().memory_limit;
    alloc::try_reserve(&mut pending.vectors, total, limit)?;
    alloc::try_reserve(&mut pending.indices, total, limit)?;
    alloc::try_reserve(&mut pending.x, total * size, limit)?;
    let old = pending.vectors.len();
    pending.vectors.resize(old + total, 0);
    pending.indices.resize(old + total, 0);
    pending.x.resize((old + total) * size, 0);
    let vs = split_by_counts(&mut pending.vectors[old..], counts, 1);
    let is = split_by_counts(&mut pending.indices[old..], counts, 1);
    let xs = split_by_counts(&mut pending.x[old * size..], counts, size);
    Ok(vs
        .into_iter()
        .zip(is)
        .zip(xs)
        .map(|((vectors, indices), x)| PendingSlots {
            vectors,
            indices,
            x,
            len: 0,
            size,
        })
        .collect())
}

/// Typed convenience read used by tests and callers: reconcile then get.
pub fn get_element<T: Scalar>(ctx: &Context, c: &mut Matrix, row: usize, col: usize) -> Result<Option<T>> {
    reconcile::reconcile(ctx, c)?;
    c.get::<T>(row, col)
}
