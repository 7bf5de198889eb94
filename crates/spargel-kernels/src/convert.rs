//! Format conversion.
//!
//! Every conversion first reconciles the container, then allocates the new
//! index structure before replacing the old one. Same-type conversions keep
//! the value bytes as they are whenever the layouts share value order
//! (sparse with every vector full, bitmap and full all store values in
//! `vector * vlen + index` order).

#![allow(
    clippy::many_single_char_names,
    reason = "Sparse kernels conventionally use i/j/k/p for indices"
)]

use crate::cast::{self, caster};
use crate::context::Context;
use crate::reconcile;
use crate::utility::util::{offsets, split_by_counts, SMALL_NNZ_LIMIT};
use rayon::prelude::*;
use spargel_core::{alloc, Config, DataType, Format, Matrix, Result, RowIndex, SparsityControl, Storage};
use std::borrow::Cow;

/// `m` itself if finalized, else a reconciled scratch copy.
pub fn finalized<'a>(ctx: &Context, m: &'a Matrix) -> Result<Cow<'a, Matrix>> {
    if m.is_finalized() {
        return Ok(Cow::Borrowed(m));
    }
    let mut scratch = m.clone();
    reconcile::reconcile(ctx, &mut scratch)?;
    Ok(Cow::Owned(scratch))
}

/// Convert `c` in place to `target`, reconciling first.
///
/// `Full` is only reachable when every cell holds an entry; otherwise the
/// container ends up as `Bitmap`. Returns the format actually reached.
pub fn ensure_format(ctx: &Context, c: &mut Matrix, target: Format) -> Result<Format> {
    reconcile::reconcile(ctx, c)?;
    let from = c.format();
    if from == target {
        return Ok(from);
    }
    ctx.install(|| match target {
        Format::Hypersparse => {
            to_sparse(ctx, c)?;
            sparse_to_hyper(ctx, c)
        }
        Format::Sparse => to_sparse(ctx, c),
        Format::Bitmap => to_bitmap(ctx, c),
        Format::Full => {
            if c.is_fully_populated() {
                c.storage = Storage::Full;
                c.nvals = 0;
                Ok(())
            } else {
                to_bitmap(ctx, c)
            }
        }
    })?;
    tracing::debug!(from = %from, to = %c.format(), "format changed");
    Ok(c.format())
}

/// Reconciled copy of `src` in format `target` with element type `ty`.
pub fn convert_to(ctx: &Context, src: &Matrix, target: Format, ty: DataType) -> Result<Matrix> {
    let mut m = src.clone();
    cast_values(ctx, &mut m, ty)?;
    ensure_format(ctx, &mut m, target)?;
    Ok(m)
}

/// Change the element type of `c`, casting every value.
pub fn cast_values(ctx: &Context, c: &mut Matrix, ty: DataType) -> Result<()> {
    if c.ty == ty {
        return Ok(());
    }
    let cst = caster(&ty, &c.ty)?;
    reconcile::reconcile(ctx, c)?;
    let count = if c.iso { 1 } else { c.x.len() / c.ty.size.max(1) };
    let mut x = ctx.alloc(count * ty.size, 0u8)?;
    ctx.install(|| cast::cast_array(&mut x, &c.x, count, &cst));
    c.x = x;
    c.ty = ty;
    Ok(())
}

/// Pick the layout a finalized container should have: sparse and
/// hypersparse swap by the fraction of non-empty vectors, and a format the
/// sparsity control forbids is replaced by an allowed one.
pub fn conform(ctx: &Context, c: &mut Matrix) -> Result<()> {
    if !c.is_finalized() {
        return Ok(());
    }
    let control = c.sparsity;
    let (want_hyper, want_sparse) = hyper_pressure(c, ctx.config());
    match c.format() {
        Format::Sparse if want_hyper && control.allows(Format::Hypersparse) => {
            ctx.install(|| sparse_to_hyper(ctx, c))?;
        }
        Format::Hypersparse if want_sparse && control.allows(Format::Sparse) => {
            ctx.install(|| hyper_to_sparse(ctx, c))?;
        }
        _ => {}
    }
    if !control.allows(c.format()) {
        let target = preferred(c, control, ctx.config());
        ensure_format(ctx, c, target)?;
    }
    Ok(())
}

#[allow(clippy::cast_precision_loss)]
fn hyper_pressure(c: &Matrix, cfg: &Config) -> (bool, bool) {
    if c.vdim <= 1 {
        return (false, true);
    }
    let nonempty = c.nvec_nonempty() as f64;
    let vdim = c.vdim as f64;
    (nonempty <= cfg.hyper_switch * vdim, nonempty > 2.0 * cfg.hyper_switch * vdim)
}

#[allow(clippy::cast_precision_loss)]
fn preferred(c: &Matrix, control: SparsityControl, cfg: &Config) -> Format {
    let cells = c.vlen.saturating_mul(c.vdim);
    let density = if cells == 0 {
        1.0
    } else {
        c.entries_held() as f64 / cells as f64
    };
    let compressed_ok = control.allows(Format::Sparse) || control.allows(Format::Hypersparse);
    let (want_hyper, _) = hyper_pressure(c, cfg);
    if control.allows(Format::Full) && c.is_fully_populated() {
        Format::Full
    } else if control.allows(Format::Bitmap) && (density >= cfg.bitmap_switch || !compressed_ok) {
        Format::Bitmap
    } else if control.allows(Format::Hypersparse) && (want_hyper || !control.allows(Format::Sparse)) {
        Format::Hypersparse
    } else if control.allows(Format::Sparse) {
        Format::Sparse
    } else {
        Format::Bitmap
    }
}

fn to_sparse(ctx: &Context, c: &mut Matrix) -> Result<()> {
    match c.format() {
        Format::Sparse => Ok(()),
        Format::Hypersparse => hyper_to_sparse(ctx, c),
        Format::Bitmap => bitmap_to_sparse(ctx, c),
        Format::Full => full_to_sparse(ctx, c),
    }
}

fn to_bitmap(ctx: &Context, c: &mut Matrix) -> Result<()> {
    match c.format() {
        Format::Bitmap => Ok(()),
        Format::Sparse | Format::Hypersparse => compressed_to_bitmap(ctx, c),
        Format::Full => {
            let cells = alloc::cell_count(c.vlen, c.vdim)?;
            let b = ctx.alloc(cells, 1u8)?;
            c.storage = Storage::Bitmap { b };
            c.nvals = cells;
            Ok(())
        }
    }
}

fn sparse_to_hyper(ctx: &Context, c: &mut Matrix) -> Result<()> {
    let Storage::Sparse { p, i } = &mut c.storage else {
        return Ok(());
    };
    let nonempty = p.windows(2).filter(|w| w[1] > w[0]).count();
    let mut h = ctx.alloc_capacity(nonempty)?;
    let mut hp = ctx.alloc_capacity(nonempty + 1)?;
    hp.push(0);
    for (k, w) in p.windows(2).enumerate() {
        if w[1] > w[0] {
            h.push(k);
            hp.push(w[1]);
        }
    }
    let i = std::mem::take(i);
    c.storage = Storage::Hypersparse { h, p: hp, i };
    Ok(())
}

fn hyper_to_sparse(ctx: &Context, c: &mut Matrix) -> Result<()> {
    let vdim = c.vdim;
    let Storage::Hypersparse { h, p, i } = &mut c.storage else {
        return Ok(());
    };
    let mut full_p = ctx.alloc(vdim + 1, 0usize)?;
    for (k, &j) in h.iter().enumerate() {
        full_p[j + 1] = p[k + 1] - p[k];
    }
    for k in 0..vdim {
        full_p[k + 1] += full_p[k];
    }
    let i = std::mem::take(i);
    c.storage = Storage::Sparse { p: full_p, i };
    Ok(())
}

fn full_to_sparse(ctx: &Context, c: &mut Matrix) -> Result<()> {
    let (vlen, vdim) = (c.vlen, c.vdim);
    let cells = alloc::cell_count(vlen, vdim)?;
    let mut p = ctx.alloc_capacity(vdim + 1)?;
    p.extend((0..=vdim).map(|k| k * vlen));
    let mut i = ctx.alloc_capacity(cells)?;
    i.extend((0..cells).map(|q| RowIndex::Live(q % vlen.max(1))));
    c.storage = Storage::Sparse { p, i };
    Ok(())
}

fn compressed_to_bitmap(ctx: &Context, c: &mut Matrix) -> Result<()> {
    let (vlen, vdim, size) = (c.vlen, c.vdim, c.ty.size);
    let cells = alloc::cell_count(vlen, vdim)?;
    let mut b = ctx.alloc(cells, 0u8)?;
    let mut x = if c.iso {
        c.x[..size].to_vec()
    } else {
        ctx.alloc(cells * size, 0u8)?
    };
    let nnz = c.entries_held();
    if cells > 0 {
        let src: &Matrix = c;
        let idx = src.indices();
        let fill = |j: usize, bj: &mut [u8], mut xj: Option<&mut [u8]>| {
            let Some(k) = src.find_vector(j) else {
                return;
            };
            let (s, e) = src.vector_range(k);
            for p in s..e {
                let i = idx[p].index();
                bj[i] = 1;
                if let Some(xj) = xj.as_mut() {
                    xj[i * size..(i + 1) * size].copy_from_slice(src.value(p));
                }
            }
        };
        if src.iso {
            b.par_chunks_mut(vlen).enumerate().for_each(|(j, bj)| fill(j, bj, None));
        } else {
            b.par_chunks_mut(vlen)
                .zip(x.par_chunks_mut(vlen * size))
                .enumerate()
                .for_each(|(j, (bj, xj))| fill(j, bj, Some(xj)));
        }
    }
    c.storage = Storage::Bitmap { b };
    c.x = x;
    c.nvals = nnz;
    Ok(())
}

fn bitmap_to_sparse(ctx: &Context, c: &mut Matrix) -> Result<()> {
    let (vlen, vdim, size, iso) = (c.vlen, c.vdim, c.ty.size, c.iso);
    let Storage::Bitmap { b } = &c.storage else {
        return Ok(());
    };
    let counts: Vec<usize> = if vlen == 0 {
        ctx.alloc(vdim, 0usize)?
    } else if b.len() < SMALL_NNZ_LIMIT {
        b.chunks(vlen).map(|bj| bj.iter().filter(|&&f| f != 0).count()).collect()
    } else {
        b.par_chunks(vlen).map(|bj| bj.iter().filter(|&&f| f != 0).count()).collect()
    };
    let p = offsets(&counts);
    let nnz = p[vdim];
    let mut i = ctx.alloc(nnz, RowIndex::Live(0))?;
    let mut x = if iso {
        c.x[..size].to_vec()
    } else {
        ctx.alloc(nnz * size, 0u8)?
    };
    if vlen > 0 {
        let unit = if iso { 0 } else { size };
        let pieces_i = split_by_counts(&mut i, &counts, 1);
        let pieces_x = split_by_counts(&mut x, &counts, unit);
        let src_x = &c.x;
        pieces_i
            .into_par_iter()
            .zip(pieces_x.into_par_iter())
            .zip(b.par_chunks(vlen))
            .enumerate()
            .for_each(|(j, ((ip, xp), bj))| {
                let mut w = 0usize;
                for (q, &f) in bj.iter().enumerate() {
                    if f == 0 {
                        continue;
                    }
                    ip[w] = RowIndex::Live(q);
                    if !iso {
                        let cell = j * vlen + q;
                        xp[w * size..(w + 1) * size].copy_from_slice(&src_x[cell * size..(cell + 1) * size]);
                    }
                    w += 1;
                }
            });
    }
    c.storage = Storage::Sparse { p, i };
    c.x = x;
    c.nvals = 0;
    Ok(())
}
