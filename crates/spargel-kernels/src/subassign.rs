//! Masked update `C(I,J)<M> = value`, optionally accumulated.
//!
//! Sparse and hypersparse targets go through two phases over the slicer's
//! tasks on the mask. Phase 1 overwrites, accumulates, undeletes or kills
//! entries that already exist in `C` and counts the ones that do not.
//! The counts are prefix-summed into disjoint windows of the pending
//! arrays, and phase 2 writes the missing entries there as pending tuples.
//! `C` is left unfinalized. Bitmap and full targets are updated in place.

#![allow(
    clippy::many_single_char_names,
    reason = "Sparse kernels conventionally use i/j/k/p for indices"
)]

use crate::cast::{self, caster, Caster};
use crate::context::Context;
use crate::convert;
use crate::ledger::{self, PendingSlots};
use crate::reconcile;
use crate::registry::{self, Combiner};
use crate::slice::{self, Pointers, TaskDesc};
use crate::transpose;
use rayon::prelude::*;
use spargel_core::{
    alloc, index, BinaryOp, DataType, Error, Format, IndexList, Matrix, Orientation, Result, RowIndex, Scalar,
    Storage,
};
use std::borrow::Cow;

/// Right-hand side of a masked update.
#[derive(Debug, Clone, Copy)]
pub enum AssignSource<'a> {
    /// One value of type `ty` assigned to every selected coordinate
    Scalar { ty: DataType, bytes: &'a [u8] },
    /// A `|I| x |J|` matrix; its entry `(r, c)` goes to `C(I[r], J[c])`
    Matrix(&'a Matrix),
}

/// Typed scalar update `C(I,J)<M> = value`.
#[allow(clippy::too_many_arguments)]
pub fn assign_scalar<T: Scalar>(
    ctx: &Context,
    c: &mut Matrix,
    mask: Option<&Matrix>,
    structural: bool,
    accum: Option<&BinaryOp>,
    rows: &IndexList,
    cols: &IndexList,
    value: T,
) -> Result<()> {
    let bytes = value.to_bytes();
    subassign(
        ctx,
        c,
        mask,
        structural,
        accum,
        rows,
        cols,
        AssignSource::Scalar { ty: T::TYPE, bytes: &bytes },
    )
}

/// `C(I,J)<M> = source`, or `C(I,J)<M> += source` with `accum`.
///
/// The mask has the shape of the selection (`|I| x |J|`); `None` selects
/// every coordinate of the window. With `structural` the mask's values are
/// ignored, otherwise they are cast to bool.
///
/// A matrix source without `accum` deletes `C` entries where the mask is
/// true and the source has no entry; with `accum` such entries are left
/// alone. Every argument is checked before `C` is touched.
#[allow(clippy::too_many_arguments)]
pub fn subassign(
    ctx: &Context,
    c: &mut Matrix,
    mask: Option<&Matrix>,
    structural: bool,
    accum: Option<&BinaryOp>,
    rows: &IndexList,
    cols: &IndexList,
    source: AssignSource<'_>,
) -> Result<()> {
    let (nrows, ncols) = c.shape();
    rows.validate(nrows)?;
    cols.validate(ncols)?;
    let window = (rows.len(nrows), cols.len(ncols));
    if let Some(m) = mask {
        if m.shape() != window {
            return Err(Error::DimensionMismatch {
                expected: window,
                got: m.shape(),
            });
        }
    }
    let src_ty = match source {
        AssignSource::Scalar { ty, bytes } => {
            if bytes.len() != ty.size {
                return Err(Error::InvalidObject(format!(
                    "scalar must be {} bytes, got {}",
                    ty.size,
                    bytes.len()
                )));
            }
            ty
        }
        AssignSource::Matrix(a) => {
            if a.shape() != window {
                return Err(Error::DimensionMismatch {
                    expected: window,
                    got: a.shape(),
                });
            }
            a.ty
        }
    };
    let value_cast = caster(&c.ty, &src_ty)?;
    let combiner = match accum {
        Some(op) => {
            if op.ty != c.ty {
                return Err(Error::DomainMismatch {
                    from: op.ty.name.into(),
                    to: c.ty.name.into(),
                });
            }
            Some(registry::resolve(op)?)
        }
        None => None,
    };
    let mask_cast = match mask {
        Some(m) if !structural => Some(caster(&DataType::BOOL, &m.ty)?),
        _ => None,
    };
    if window.0 == 0 || window.1 == 0 {
        return Ok(());
    }

    // Scratch inputs in C's orientation, reconciled, source cast to C's type.
    let mask_view: Cow<'_, Matrix> = match mask {
        Some(m) => transpose::aligned(ctx, m, c.orientation)?,
        None => Cow::Owned(Matrix::full_iso(window.0, window.1, c.orientation, true)?),
    };
    let scalar: Option<Vec<u8>> = match source {
        AssignSource::Scalar { bytes, .. } => {
            let mut v = vec![0u8; c.ty.size];
            value_cast.one(&mut v, bytes);
            Some(v)
        }
        AssignSource::Matrix(_) => None,
    };
    let src_view: Option<Cow<'_, Matrix>> = match source {
        AssignSource::Matrix(a) => {
            let mut view = transpose::aligned(ctx, a, c.orientation)?;
            if view.ty != c.ty {
                convert::cast_values(ctx, view.to_mut(), c.ty)?;
            }
            Some(view)
        }
        AssignSource::Scalar { .. } => None,
    };
    let deletes = src_view.is_some() && combiner.is_none();

    let (vsel, isel) = match c.orientation {
        Orientation::ByRow => (rows, cols),
        Orientation::ByCol => (cols, rows),
    };
    let plan = Plan {
        mask: &mask_view,
        mask_cast: mask_cast.as_ref(),
        mask_p: Pointers::of(&mask_view),
        scalar: scalar.as_deref(),
        src: src_view.as_deref(),
        combiner: combiner.as_ref(),
        vsel,
        isel,
    };

    // Settle C's deferred state for this kind of update.
    if c.format().is_compressed() {
        if deletes && !c.pending.is_empty() {
            reconcile::reconcile(ctx, c)?;
        }
        ledger::ensure_dup(ctx, c, accum)?;
        // Every mask entry may become a pending tuple; reserving the worst
        // case up front keeps the update all-or-nothing.
        let worst = plan.mask_p.nnz();
        let limit = ctx.config().memory_limit;
        alloc::try_reserve(&mut c.pending.vectors, worst, limit)?;
        alloc::try_reserve(&mut c.pending.indices, worst, limit)?;
        alloc::try_reserve(&mut c.pending.x, worst * c.ty.size, limit)?;
    }
    settle_iso(ctx, c, plan.scalar, combiner.is_none())?;

    let span = tracing::debug_span!(
        "subassign",
        format = %c.format(),
        window = ?window,
        accum = accum.map(BinaryOp::name),
        deletes
    );
    let _enter = span.enter();
    if c.format().is_compressed() {
        ctx.install(|| subassign_compressed(ctx, c, &plan))
    } else {
        if deletes && c.format() == Format::Full {
            convert::ensure_format(ctx, c, Format::Bitmap)?;
        }
        ctx.install(|| subassign_dense(ctx, c, &plan));
        Ok(())
    }
}

/// An empty target assigned a plain scalar becomes uniform; a uniform
/// target that would receive anything else is expanded.
fn settle_iso(ctx: &Context, c: &mut Matrix, scalar: Option<&[u8]>, overwrite: bool) -> Result<()> {
    let size = c.ty.size;
    let empty = c.entries_held() == 0 && c.pending.is_empty();
    match scalar {
        Some(v) if overwrite && empty => {
            c.iso = true;
            c.x = v.to_vec();
            Ok(())
        }
        Some(v) if overwrite && c.iso && c.ty.values_equal(&c.x[..size], v) => Ok(()),
        _ => c.expand_iso(ctx.config().memory_limit),
    }
}

/// Everything the per-task loops read.
struct Plan<'a> {
    mask: &'a Matrix,
    mask_cast: Option<&'a Caster>,
    mask_p: Pointers<'a>,
    scalar: Option<&'a [u8]>,
    src: Option<&'a Matrix>,
    combiner: Option<&'a Combiner>,
    /// Selection along C's vectors, and along C's indices
    vsel: &'a IndexList,
    isel: &'a IndexList,
}

impl Plan<'_> {
    /// Mask index held at position `p` of mask vector `k`.
    #[inline]
    fn mask_index(&self, k: usize, p: usize) -> usize {
        match &self.mask.storage {
            Storage::Sparse { i, .. } | Storage::Hypersparse { i, .. } => i[p].index(),
            Storage::Bitmap { .. } | Storage::Full => p - k * self.mask.vlen,
        }
    }

    /// Call `f(im)` for every true mask entry at positions `s..e` of vector `k`.
    #[inline]
    fn each_true_in(&self, k: usize, s: usize, e: usize, mut f: impl FnMut(usize)) {
        let m = self.mask;
        for p in s..e {
            if let Storage::Bitmap { b } = &m.storage {
                if b[p] == 0 {
                    continue;
                }
            }
            if let Some(mc) = self.mask_cast {
                if !cast::as_bool(mc, m.value(p)) {
                    continue;
                }
            }
            f(self.mask_index(k, p));
        }
    }

    /// Call `f(jm, im)` for every true mask entry of `task`, in order.
    fn for_each_true(&self, task: &TaskDesc, mut f: impl FnMut(usize, usize)) {
        for k in task.kfirst..task.klast {
            let (s, e) = task.clip(k, self.mask_p);
            let jm = self.mask.vector_id(k);
            self.each_true_in(k, s, e, |im| f(jm, im));
        }
    }

    /// Value to write at mask coordinate `(jm, im)`, already in C's type.
    #[inline]
    fn value_at(&self, jm: usize, im: usize) -> Option<&[u8]> {
        match (self.scalar, self.src) {
            (Some(v), _) => Some(v),
            (None, Some(a)) => match a.locate_in_vector(jm, im) {
                Some((p, false)) => Some(a.value(p)),
                _ => None,
            },
            (None, None) => None,
        }
    }

    /// True when the index selection is strictly increasing, so a fine task's
    /// entries land in a contiguous, disjoint part of the C vector.
    fn isel_increasing(&self) -> bool {
        match self.isel {
            IndexList::All | IndexList::Range { .. } | IndexList::Stride { .. } => true,
            IndexList::List(v) => v.windows(2).all(|w| w[0] < w[1]),
        }
    }
}

#[derive(Default, Clone, Copy)]
struct Phase1 {
    pending: usize,
    killed: usize,
    revived: usize,
}

/// The part of one C vector a task may touch.
#[derive(Clone, Copy, Debug)]
struct Window {
    lo: usize,
    hi: usize,
    /// Start of the whole C vector
    start: usize,
    /// The whole C vector holds every index, so positions are direct
    dense: bool,
}

/// C positions reachable from mask vector `k` within `task`, or `None` when
/// C does not hold the target vector.
fn window_for(c: &Matrix, plan: &Plan<'_>, task: &TaskDesc, k: usize) -> Option<Window> {
    let cj = plan.vsel.get(plan.mask.vector_id(k));
    let ck = c.find_vector(cj)?;
    let (cs, ce) = c.vector_range(ck);
    let dense = ce - cs == c.vlen;
    let (s, e) = task.clip(k, plan.mask_p);
    if !task.fine || s == e {
        return Some(Window {
            lo: cs,
            hi: ce,
            start: cs,
            dense,
        });
    }
    // fine task: the sub-range between its first and last selected index
    let lo_i = plan.isel.get(plan.mask_index(k, s));
    let hi_i = plan.isel.get(plan.mask_index(k, e - 1));
    let vec = &c.indices()[cs..ce];
    Some(Window {
        lo: cs + vec.partition_point(|r| r.index() < lo_i),
        hi: cs + vec.partition_point(|r| r.index() <= hi_i),
        start: cs,
        dense,
    })
}

fn subassign_compressed(ctx: &Context, c: &mut Matrix, plan: &Plan<'_>) -> Result<()> {
    let size = c.ty.size;
    let tasks = slice::slice_for(ctx, plan.mask, plan.isel_increasing());

    let windows: Vec<Vec<Option<Window>>> = {
        let target: &Matrix = c;
        tasks
            .par_iter()
            .map(|task| (task.kfirst..task.klast).map(|k| window_for(target, plan, task, k)).collect())
            .collect()
    };
    let iso = c.iso;
    let (i_addr, x_addr) = match &mut c.storage {
        Storage::Sparse { i, .. } | Storage::Hypersparse { i, .. } => {
            (i.as_mut_ptr() as usize, c.x.as_mut_ptr() as usize)
        }
        _ => return Err(Error::InvalidObject("target is not compressed".into())),
    };

    // Phase 1: in-place updates, count what is missing
    let phase1: Vec<Phase1> = tasks
        .par_iter()
        .zip(windows.par_iter())
        .map(|(task, wins)| {
            let mut out = Phase1::default();
            for (k, win) in (task.kfirst..task.klast).zip(wins) {
                let (s, e) = task.clip(k, plan.mask_p);
                let jm = plan.mask.vector_id(k);
                let Some(win) = *win else {
                    plan.each_true_in(k, s, e, |im| {
                        if plan.value_at(jm, im).is_some() {
                            out.pending += 1;
                        }
                    });
                    continue;
                };
                let n = win.hi - win.lo;
                // SAFETY: windows of distinct tasks are disjoint ranges of C's
                // index and value arrays: distinct C vectors, or disjoint
                // sub-ranges of one vector for fine tasks.
                let ci: &mut [RowIndex] =
                    unsafe { std::slice::from_raw_parts_mut((i_addr as *mut RowIndex).add(win.lo), n) };
                let cx: &mut [u8] = if iso {
                    &mut []
                } else {
                    unsafe { std::slice::from_raw_parts_mut((x_addr as *mut u8).add(win.lo * size), n * size) }
                };
                plan.each_true_in(k, s, e, |im| {
                    let i = plan.isel.get(im);
                    let value = plan.value_at(jm, im);
                    let q = if win.dense {
                        Some(win.start + i - win.lo)
                    } else {
                        index::search(ci, i)
                    };
                    match (q, value) {
                        (Some(q), Some(v)) => {
                            let dst = if iso { None } else { Some(&mut cx[q * size..(q + 1) * size]) };
                            if ci[q].is_zombie() {
                                ci[q] = ci[q].revive();
                                out.revived += 1;
                                if let Some(dst) = dst {
                                    dst.copy_from_slice(v);
                                }
                            } else if let Some(dst) = dst {
                                match plan.combiner {
                                    Some(cb) => cb.apply(dst, v),
                                    None => dst.copy_from_slice(v),
                                }
                            }
                        }
                        (Some(q), None) => {
                            if plan.combiner.is_none() && !ci[q].is_zombie() {
                                ci[q] = ci[q].kill();
                                out.killed += 1;
                            }
                        }
                        (None, Some(_)) => out.pending += 1,
                        (None, None) => {}
                    }
                });
            }
            out
        })
        .collect();

    let killed: usize = phase1.iter().map(|t| t.killed).sum();
    let revived: usize = phase1.iter().map(|t| t.revived).sum();
    c.nzombies = c.nzombies + killed - revived;

    // Phase 2: prefix-summed windows of the pending arrays, one per task
    let counts: Vec<usize> = phase1.iter().map(|t| t.pending).collect();
    let added: usize = counts.iter().sum();
    let mut pending = std::mem::take(&mut c.pending);
    let old = pending.len();
    let slots = match ledger::reserve_slots(ctx, &mut pending, size, &counts) {
        Ok(slots) => slots,
        Err(e) => {
            c.pending = pending;
            return Err(e);
        }
    };
    let target: &Matrix = c;
    tasks
        .par_iter()
        .zip(slots.into_par_iter())
        .for_each(|(task, mut slot): (&TaskDesc, PendingSlots<'_>)| {
            plan.for_each_true(task, |jm, im| {
                let Some(v) = plan.value_at(jm, im) else {
                    return;
                };
                let j = plan.vsel.get(jm);
                let i = plan.isel.get(im);
                if target.locate_in_vector(j, i).is_none() {
                    slot.push(j, i, v);
                }
            });
            debug_assert_eq!(slot.filled(), slot.vectors.len());
        });
    pending.note_appended(old);
    c.pending = pending;
    tracing::debug!(tasks = tasks.len(), added, killed, revived, "subassign phases done");
    Ok(())
}

fn subassign_dense(ctx: &Context, c: &mut Matrix, plan: &Plan<'_>) {
    let size = c.ty.size;
    let vlen = c.vlen;
    let iso = c.iso;
    let tasks = slice::slice_for(ctx, plan.mask, true);
    let x_addr = c.x.as_mut_ptr() as usize;
    let b_addr = match &mut c.storage {
        Storage::Bitmap { b } => Some(b.as_mut_ptr() as usize),
        _ => None,
    };
    let delta: isize = tasks
        .par_iter()
        .map(|task| {
            let mut delta = 0isize;
            plan.for_each_true(task, |jm, im| {
                let cell = plan.vsel.get(jm) * vlen + plan.isel.get(im);
                // SAFETY: each mask entry belongs to exactly one task and maps
                // to its own cell of C.
                let present = b_addr.map_or(true, |b| unsafe { *(b as *const u8).add(cell) } != 0);
                let dst = (!iso).then(|| unsafe { std::slice::from_raw_parts_mut((x_addr as *mut u8).add(cell * size), size) });
                match plan.value_at(jm, im) {
                    Some(v) => {
                        if let Some(dst) = dst {
                            match plan.combiner {
                                Some(cb) if present => cb.apply(dst, v),
                                _ => dst.copy_from_slice(v),
                            }
                        }
                        if let (Some(b), false) = (b_addr, present) {
                            unsafe { *(b as *mut u8).add(cell) = 1 };
                            delta += 1;
                        }
                    }
                    None => {
                        if let (Some(b), true, None) = (b_addr, present, plan.combiner) {
                            unsafe { *(b as *mut u8).add(cell) = 0 };
                            delta -= 1;
                        }
                    }
                }
            });
            delta
        })
        .sum();
    if b_addr.is_some() {
        c.nvals = c.nvals.saturating_add_signed(delta);
    }
    tracing::debug!(tasks = tasks.len(), delta, "dense target updated in place");
}
