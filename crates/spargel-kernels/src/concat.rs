//! Tile concatenation into a bitmap or full destination.
//!
//! Tiles form a row-major `m x n` grid. Their shapes define the row and
//! column boundaries; every tile in a grid row must share a height and
//! every tile in a grid column a width. The destination is dense (bitmap,
//! or full when every tile is fully populated), so each tile copies into
//! its own rectangle of cells with no index merge.

#![allow(
    clippy::many_single_char_names,
    reason = "Sparse kernels conventionally use i/j/k/p for indices"
)]

use crate::cast::{caster, Caster};
use crate::context::Context;
use crate::convert;
use crate::transpose;
use crate::utility::util::{offsets, SMALL_NNZ_LIMIT};
use rayon::prelude::*;
use spargel_core::{alloc, Error, Matrix, Pending, Result, Storage};
use std::borrow::Cow;

/// Row and column boundaries of a tile grid: `rows[a]..rows[a + 1]` is the
/// row range of grid row `a`, likewise for columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileBounds {
    pub rows: Vec<usize>,
    pub cols: Vec<usize>,
}

/// Derive and check the boundaries of the row-major `m x n` grid `tiles`.
pub fn tile_bounds(tiles: &[&Matrix], m: usize, n: usize) -> Result<TileBounds> {
    if m == 0 || n == 0 || tiles.len() != m * n {
        return Err(Error::InvalidObject(format!(
            "expected {m} x {n} tiles, got {}",
            tiles.len()
        )));
    }
    let heights: Vec<usize> = (0..m).map(|a| tiles[a * n].nrows()).collect();
    let widths: Vec<usize> = (0..n).map(|b| tiles[b].ncols()).collect();
    for a in 0..m {
        for b in 0..n {
            let expected = (heights[a], widths[b]);
            let got = tiles[a * n + b].shape();
            if got != expected {
                return Err(Error::DimensionMismatch { expected, got });
            }
        }
    }
    Ok(TileBounds {
        rows: offsets(&heights),
        cols: offsets(&widths),
    })
}

/// `C = [tiles]`, replacing the contents of `c` and keeping its type and
/// orientation. Tile values are cast to `c`'s type.
pub fn concat(ctx: &Context, c: &mut Matrix, tiles: &[&Matrix], m: usize, n: usize) -> Result<()> {
    let bounds = tile_bounds(tiles, m, n)?;
    let total = (bounds.rows[m], bounds.cols[n]);
    if total != c.shape() {
        return Err(Error::DimensionMismatch {
            expected: c.shape(),
            got: total,
        });
    }
    let casters = tiles
        .iter()
        .map(|t| caster(&c.ty, &t.ty))
        .collect::<Result<Vec<Caster>>>()?;

    let span = tracing::debug_span!("concat", grid = ?(m, n), shape = ?total);
    let _enter = span.enter();

    // Scratch copies in c's orientation, reconciled.
    let scratch = tiles
        .iter()
        .map(|t| transpose::aligned(ctx, t, c.orientation))
        .collect::<Result<Vec<Cow<'_, Matrix>>>>()?;
    let full = scratch.iter().all(|t| t.is_fully_populated());

    let size = c.ty.size;
    let cells = alloc::cell_count(c.vlen, c.vdim)?;
    let mut x = ctx.alloc(cells * size, 0u8)?;
    let mut b = if full { Vec::new() } else { ctx.alloc(cells, 0u8)? };
    let x_addr = x.as_mut_ptr() as usize;
    let b_addr = (!full).then(|| b.as_mut_ptr() as usize);
    let (orientation, vlen) = (c.orientation, c.vlen);

    let nvals: usize = ctx.install(|| {
        scratch
            .par_iter()
            .zip(casters.par_iter())
            .enumerate()
            .map(|(t, (tile, cast))| {
                let (a, bcol) = (t / n, t % n);
                let (j0, i0) = orientation.to_vector_space(bounds.rows[a], bounds.cols[bcol]);
                let dst = Dest {
                    x_addr,
                    b_addr,
                    vlen,
                    size,
                    j0,
                    i0,
                };
                let copied = copy_tile(tile, cast, &dst);
                tracing::trace!(tile = t, format = %tile.format(), copied, "tile copied");
                copied
            })
            .sum()
    });

    c.storage = if full { Storage::Full } else { Storage::Bitmap { b } };
    c.x = x;
    c.iso = false;
    c.nvals = if full { 0 } else { nvals };
    c.nzombies = 0;
    c.pending = Pending::new();
    tracing::debug!(format = %c.format(), nvals, "concatenated");
    convert::conform(ctx, c)
}

/// Where one tile lands in the destination.
struct Dest {
    x_addr: usize,
    b_addr: Option<usize>,
    vlen: usize,
    size: usize,
    /// Vector and index offset of the tile's window
    j0: usize,
    i0: usize,
}

impl Dest {
    /// Write one entry at tile-local `(j, i)`.
    ///
    /// # Safety
    /// The caller must be the only writer of the destination cell; tiles
    /// cover disjoint rectangles, and each tile vector is written once.
    #[inline]
    unsafe fn put(&self, j: usize, i: usize, value: &[u8], cast: &Caster) {
        let cell = (self.j0 + j) * self.vlen + self.i0 + i;
        let dst = std::slice::from_raw_parts_mut((self.x_addr as *mut u8).add(cell * self.size), self.size);
        cast.one(dst, value);
        if let Some(b) = self.b_addr {
            *(b as *mut u8).add(cell) = 1;
        }
    }
}

/// Copy every entry of `tile` into its window. Returns the number copied.
fn copy_tile(tile: &Matrix, cast: &Caster, dst: &Dest) -> usize {
    let idx = tile.indices();
    let copy_vector = |k: usize| -> usize {
        let j = tile.vector_id(k);
        let (s, e) = tile.vector_range(k);
        let mut copied = 0usize;
        for p in s..e {
            let i = match &tile.storage {
                Storage::Sparse { .. } | Storage::Hypersparse { .. } => idx[p].index(),
                Storage::Bitmap { b } => {
                    if b[p] == 0 {
                        continue;
                    }
                    p - s
                }
                Storage::Full => p - s,
            };
            // SAFETY: (j, i) is unique within the tile and the tile's window
            // is disjoint from every other tile's.
            unsafe { dst.put(j, i, tile.value(p), cast) };
            copied += 1;
        }
        copied
    };
    let nvec = tile.nvec();
    let work = match &tile.storage {
        Storage::Sparse { .. } | Storage::Hypersparse { .. } => idx.len(),
        _ => nvec * tile.vlen,
    };
    if work < SMALL_NNZ_LIMIT {
        (0..nvec).map(copy_vector).sum()
    } else {
        (0..nvec).into_par_iter().map(copy_vector).sum()
    }
}
