//! Reorientation: hold the same logical matrix with vectors along the other
//! dimension.
//!
//! Compressed inputs use per-tile histograms: vectors are split into one
//! range per tile, each tile counts the entries it sends to every output
//! vector, the counts are scanned into per-tile write offsets, and the fill
//! phase writes without synchronization. Tiles walk their vectors in order,
//! so the output indices come out sorted with no post-sort. When the output
//! would have more vectors than entries, the entries are sorted by output
//! coordinate instead and the result is hypersparse. Dense inputs are a
//! plain cell permutation.

#![allow(
    clippy::many_single_char_names,
    reason = "Sparse kernels conventionally use i/j/k/p/r for indices"
)]

use crate::context::Context;
use crate::convert;
use crate::utility::util::SMALL_NNZ_LIMIT;
use rayon::prelude::*;
use spargel_core::{alloc, Matrix, Orientation, Result, RowIndex, Storage};
use std::borrow::Cow;

/// Histograms are only used while their total size stays under this
const HISTOGRAM_BUDGET: usize = 512 * 1024 * 1024;

/// Copy of `a` held in `orientation`, reconciled.
pub fn reorient(ctx: &Context, a: &Matrix, orientation: Orientation) -> Result<Matrix> {
    let a = convert::finalized(ctx, a)?;
    if a.orientation == orientation {
        return Ok(a.into_owned());
    }
    let span = tracing::debug_span!("reorient", format = %a.format(), nnz = a.entries_held());
    let _enter = span.enter();
    let (nrows, ncols) = a.shape();
    let mut out = Matrix::with_orientation(a.ty, nrows, ncols, orientation);
    out.sparsity = a.sparsity;
    out.iso = a.iso;
    ctx.install(|| match &a.storage {
        Storage::Full | Storage::Bitmap { .. } => transpose_dense(ctx, &a, &mut out),
        Storage::Sparse { .. } | Storage::Hypersparse { .. } if a.vlen > a.entries_held() => {
            transpose_hyper(ctx, &a, &mut out)
        }
        Storage::Sparse { .. } | Storage::Hypersparse { .. } => transpose_compressed(ctx, &a, &mut out),
    })?;
    convert::conform(ctx, &mut out)?;
    Ok(out)
}

/// `a` as-is when already finalized and held in `orientation`, else a
/// reconciled, reoriented scratch copy.
pub fn aligned<'a>(ctx: &Context, a: &'a Matrix, orientation: Orientation) -> Result<Cow<'a, Matrix>> {
    if a.orientation == orientation {
        return convert::finalized(ctx, a);
    }
    reorient(ctx, a, orientation).map(Cow::Owned)
}

fn transpose_dense(ctx: &Context, a: &Matrix, out: &mut Matrix) -> Result<()> {
    let size = a.ty.size;
    let (vlen_in, vlen_out) = (a.vlen, a.vdim);
    let cells = alloc::cell_count(a.vlen, a.vdim)?;
    let x = if a.iso {
        a.x[..size].to_vec()
    } else {
        let mut x = ctx.alloc(cells * size, 0u8)?;
        if cells > 0 {
            x.par_chunks_mut(vlen_out * size).enumerate().for_each(|(r, xr)| {
                for j in 0..vlen_out {
                    let src = (j * vlen_in + r) * size;
                    xr[j * size..(j + 1) * size].copy_from_slice(&a.x[src..src + size]);
                }
            });
        }
        x
    };
    out.storage = match &a.storage {
        Storage::Bitmap { b } => {
            let mut bt = ctx.alloc(cells, 0u8)?;
            if cells > 0 {
                bt.par_chunks_mut(vlen_out).enumerate().for_each(|(r, br)| {
                    for (j, f) in br.iter_mut().enumerate() {
                        *f = b[j * vlen_in + r];
                    }
                });
            }
            out.nvals = a.nvals;
            Storage::Bitmap { b: bt }
        }
        _ => Storage::Full,
    };
    out.x = x;
    Ok(())
}

#[allow(
    clippy::needless_range_loop,
    reason = "Index-based loops keep the histogram math clear"
)]
fn transpose_compressed(ctx: &Context, a: &Matrix, out: &mut Matrix) -> Result<()> {
    let size = a.ty.size;
    let nvec = a.nvec();
    let nnz = a.entries_held();
    let vdim_out = a.vlen;
    let idx = a.indices();

    let mut tiles = if nnz < SMALL_NNZ_LIMIT { 1 } else { ctx.max_threads() };
    let word = std::mem::size_of::<usize>();
    while tiles > 1 && tiles.saturating_mul(vdim_out).saturating_mul(word) > HISTOGRAM_BUDGET {
        tiles /= 2;
    }
    let tiles = tiles.clamp(1, nvec.max(1));
    let tile_len = nvec.div_ceil(tiles).max(1);
    let tile_range = |t: usize| {
        let start = (t * tile_len).min(nvec);
        (start, (start + tile_len).min(nvec))
    };

    // 1) per-tile counts per output vector
    let mut counts: Vec<Vec<usize>> = (0..tiles)
        .into_par_iter()
        .map(|t| {
            let mut c = ctx.alloc(vdim_out, 0usize)?;
            let (ks, ke) = tile_range(t);
            for k in ks..ke {
                let (s, e) = a.vector_range(k);
                for p in s..e {
                    c[idx[p].index()] += 1;
                }
            }
            Ok(c)
        })
        .collect::<Result<_>>()?;

    // 2) output pointers, and counts turned into per-tile write offsets
    let mut p_out = ctx.alloc(vdim_out + 1, 0usize)?;
    let mut running = 0usize;
    for r in 0..vdim_out {
        p_out[r] = running;
        for t in 0..tiles {
            let here = counts[t][r];
            counts[t][r] = running;
            running += here;
        }
    }
    p_out[vdim_out] = running;
    debug_assert_eq!(running, nnz);

    // 3) fill
    let mut new_i = ctx.alloc(nnz, RowIndex::Live(0))?;
    let mut new_x = if a.iso {
        a.x[..size].to_vec()
    } else {
        ctx.alloc(nnz * size, 0u8)?
    };
    let i_addr = new_i.as_mut_ptr() as usize;
    let x_addr = new_x.as_mut_ptr() as usize;
    let iso = a.iso;
    counts.into_par_iter().enumerate().for_each(|(t, mut pos)| {
        let (ks, ke) = tile_range(t);
        for k in ks..ke {
            let j = a.vector_id(k);
            let (s, e) = a.vector_range(k);
            for p in s..e {
                let r = idx[p].index();
                let dst = pos[r];
                pos[r] += 1;
                // SAFETY: tile t owns positions [offset(t, r), offset(t, r) + count(t, r))
                // of every output vector r; the ranges are disjoint across tiles.
                unsafe {
                    std::ptr::write((i_addr as *mut RowIndex).add(dst), RowIndex::Live(j));
                    if !iso {
                        std::ptr::copy_nonoverlapping(a.value(p).as_ptr(), (x_addr as *mut u8).add(dst * size), size);
                    }
                }
            }
        }
    });

    out.storage = Storage::Sparse { p: p_out, i: new_i };
    out.x = new_x;
    Ok(())
}

/// Reorientation when the output has more vectors than entries: sort
/// `(index, vector)` pairs and emit only the non-empty output vectors, so
/// nothing is sized by the dimension.
fn transpose_hyper(ctx: &Context, a: &Matrix, out: &mut Matrix) -> Result<()> {
    let size = a.ty.size;
    let nnz = a.entries_held();
    let idx = a.indices();

    // (output vector, output index, source position)
    let mut pairs: Vec<(usize, usize, usize)> = ctx.alloc_capacity(nnz)?;
    for k in 0..a.nvec() {
        let j = a.vector_id(k);
        let (s, e) = a.vector_range(k);
        pairs.extend((s..e).map(|p| (idx[p].index(), j, p)));
    }
    if nnz < SMALL_NNZ_LIMIT {
        pairs.sort_unstable();
    } else {
        pairs.par_sort_unstable();
    }

    let nonempty = pairs.windows(2).filter(|w| w[0].0 != w[1].0).count() + usize::from(nnz > 0);
    let mut h = ctx.alloc_capacity(nonempty)?;
    let mut p_out = ctx.alloc_capacity(nonempty + 1)?;
    p_out.push(0);
    for (q, &(r, _, _)) in pairs.iter().enumerate() {
        if h.last() != Some(&r) {
            if q > 0 {
                p_out.push(q);
            }
            h.push(r);
        }
    }
    if nnz > 0 {
        p_out.push(nnz);
    }

    let mut new_i = ctx.alloc_capacity(nnz)?;
    new_i.extend(pairs.iter().map(|&(_, j, _)| RowIndex::Live(j)));
    let new_x = if a.iso {
        a.x[..size].to_vec()
    } else {
        let mut x = ctx.alloc(nnz * size, 0u8)?;
        if size > 0 {
            x.par_chunks_mut(size)
                .zip(pairs.par_iter())
                .for_each(|(dst, &(_, _, p))| dst.copy_from_slice(a.value(p)));
        }
        x
    };
    tracing::trace!(nnz, nonempty, "reoriented into hypersparse");
    out.storage = Storage::Hypersparse { h, p: p_out, i: new_i };
    out.x = new_x;
    Ok(())
}
