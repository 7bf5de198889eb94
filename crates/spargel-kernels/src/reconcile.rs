//! Reconciliation: drop zombies and merge pending tuples into canonical
//! sorted storage.
//!
//! The new index and value arrays are sized and allocated before the
//! container is touched, so an allocation failure leaves it exactly as it
//! was (still unfinalized).

#![allow(
    clippy::many_single_char_names,
    reason = "Sparse kernels conventionally use i/j/k/p for indices"
)]

use crate::context::Context;
use crate::convert;
use crate::registry::{self, Combiner};
use crate::utility::util::{offsets, split_by_counts, SMALL_NNZ_LIMIT};
use rayon::prelude::*;
use spargel_core::{BinaryOp, Error, Matrix, Pending, Result, RowIndex, Storage};

/// Where one output entry comes from.
#[derive(Clone, Copy)]
enum Pick {
    Existing(usize),
    Pending(usize),
    /// Live existing entry and pending tuple at the same index
    Both(usize, usize),
}

/// Linear merge of one vector's existing entries (zombies skipped) with its
/// coalesced pending indices. `emit(index, pick)` runs once per output entry
/// in increasing index order.
#[inline]
fn merge_vector(existing: &[RowIndex], ebase: usize, pending: &[usize], pbase: usize, mut emit: impl FnMut(usize, Pick)) {
    let (mut a, mut b) = (0usize, 0usize);
    loop {
        while a < existing.len() && existing[a].is_zombie() {
            a += 1;
        }
        match (existing.get(a), pending.get(b)) {
            (Some(e), Some(&q)) => {
                let ie = e.index();
                if ie < q {
                    emit(ie, Pick::Existing(ebase + a));
                    a += 1;
                } else if q < ie {
                    emit(q, Pick::Pending(pbase + b));
                    b += 1;
                } else {
                    emit(q, Pick::Both(ebase + a, pbase + b));
                    a += 1;
                    b += 1;
                }
            }
            (Some(e), None) => {
                emit(e.index(), Pick::Existing(ebase + a));
                a += 1;
            }
            (None, Some(&q)) => {
                emit(q, Pick::Pending(pbase + b));
                b += 1;
            }
            (None, None) => break,
        }
    }
}

/// Pending tuples sorted by (vector, index) with duplicates combined.
struct Coalesced {
    vectors: Vec<usize>,
    indices: Vec<usize>,
    x: Vec<u8>,
}

fn coalesce(ctx: &Context, pending: &Pending, combiner: Option<&Combiner>, size: usize) -> Result<Coalesced> {
    let n = pending.len();
    let mut order = ctx.alloc_capacity::<usize>(n)?;
    order.extend(0..n);
    if !pending.sorted {
        // stable: equal coordinates keep their append order
        let key = |&t: &usize| (pending.vectors[t], pending.indices[t]);
        if n < SMALL_NNZ_LIMIT {
            order.sort_by_key(key);
        } else {
            order.par_sort_by_key(key);
        }
    }
    let mut out = Coalesced {
        vectors: ctx.alloc_capacity(n)?,
        indices: ctx.alloc_capacity(n)?,
        x: ctx.alloc_capacity(n * size)?,
    };
    let value = |t: usize| &pending.x[t * size..(t + 1) * size];
    let mut s = 0usize;
    while s < n {
        let first = order[s];
        let coord = (pending.vectors[first], pending.indices[first]);
        let start = out.x.len();
        out.x.extend_from_slice(value(first));
        s += 1;
        while s < n && (pending.vectors[order[s]], pending.indices[order[s]]) == coord {
            let acc = &mut out.x[start..start + size];
            match combiner {
                Some(cb) => cb.apply(acc, value(order[s])),
                None => acc.copy_from_slice(value(order[s])),
            }
            s += 1;
        }
        out.vectors.push(coord.0);
        out.indices.push(coord.1);
    }
    Ok(out)
}

/// Bring `c` into finalized form: no zombies, no pending tuples, indices
/// sorted and unique within each vector. A no-op on finalized containers.
///
/// Pending tuples at the same coordinate are combined first to last with
/// the container's dup operator (overwrite if none); a pending tuple that
/// lands on a live entry is combined as `dup(existing, pending)`, one that
/// lands on a zombie replaces it.
pub fn reconcile(ctx: &Context, c: &mut Matrix) -> Result<()> {
    if c.is_finalized() {
        return Ok(());
    }
    if !c.format().is_compressed() {
        return Err(Error::InvalidObject(format!(
            "{} container cannot hold zombies or pending tuples",
            c.format()
        )));
    }
    let span = tracing::debug_span!("reconcile", zombies = c.nzombies, pending = c.pending.len());
    let _enter = span.enter();
    ctx.install(|| merge_pending(ctx, c))?;
    // The merge is committed; a layout switch that cannot be afforded now is
    // left for a later conform.
    if let Err(err) = convert::conform(ctx, c) {
        tracing::debug!(%err, format = %c.format(), "conform after reconcile skipped");
    }
    Ok(())
}

/// Set the dup operator and reconcile.
pub fn reconcile_with(ctx: &Context, c: &mut Matrix, dup: Option<&BinaryOp>) -> Result<()> {
    c.pending.dup = dup.cloned();
    reconcile(ctx, c)
}

fn merge_pending(ctx: &Context, c: &mut Matrix) -> Result<()> {
    let size = c.ty.size;
    let combiner = c.pending.dup.as_ref().map(registry::resolve).transpose()?;
    let pend = coalesce(ctx, &c.pending, combiner.as_ref(), size)?;
    let np = pend.vectors.len();

    // Output vector list: every vector for sparse, the union of held and
    // pending vectors for hypersparse. `held[o]` is the position in the
    // existing vector list, if any.
    let hyper = matches!(c.storage, Storage::Hypersparse { .. });
    let (ids, held): (Vec<usize>, Vec<Option<usize>>) = if hyper {
        let nvec = c.nvec();
        let mut ids = ctx.alloc_capacity(nvec + np)?;
        let mut held = ctx.alloc_capacity(nvec + np)?;
        let (mut k, mut t) = (0usize, 0usize);
        while k < nvec || t < np {
            let hk = (k < nvec).then(|| c.vector_id(k));
            let pt = (t < np).then(|| pend.vectors[t]);
            let j = match (hk, pt) {
                (Some(a), Some(b)) => a.min(b),
                (Some(a), None) => a,
                (None, Some(b)) => b,
                (None, None) => break,
            };
            if hk == Some(j) {
                held.push(Some(k));
                k += 1;
            } else {
                held.push(None);
            }
            ids.push(j);
            while t < np && pend.vectors[t] == j {
                t += 1;
            }
        }
        (ids, held)
    } else {
        ((0..c.vdim).collect(), (0..c.vdim).map(Some).collect())
    };
    let nout = ids.len();

    let mut pstart = ctx.alloc_capacity::<usize>(nout + 1)?;
    let mut t = 0usize;
    for &j in &ids {
        while t < np && pend.vectors[t] < j {
            t += 1;
        }
        pstart.push(t);
    }
    pstart.push(np);

    let existing = c.indices();
    let range = |o: usize| held[o].map_or((0, 0), |k| c.vector_range(k));
    let count_one = |o: usize| {
        let (a, b) = range(o);
        let mut n = 0usize;
        merge_vector(&existing[a..b], a, &pend.indices[pstart[o]..pstart[o + 1]], pstart[o], |_, _| n += 1);
        n
    };
    let counts: Vec<usize> = if c.entries_held() + np < SMALL_NNZ_LIMIT {
        (0..nout).map(count_one).collect()
    } else {
        (0..nout).into_par_iter().map(count_one).collect()
    };
    let p_all = offsets(&counts);
    let nnz = p_all[nout];

    // Uniform value survives when every merged value is the same one.
    let live_existing = c.entries_held() - c.nzombies;
    let reference: Option<&[u8]> = if c.iso && live_existing > 0 {
        Some(&c.x[..size])
    } else if np > 0 {
        Some(&pend.x[..size])
    } else {
        None
    };
    let dup_keeps = c.pending.dup.as_ref().map_or(true, BinaryOp::is_idempotent);
    let iso = nnz > 0
        && (c.iso || live_existing == 0)
        && dup_keeps
        && reference.is_some_and(|r| pend.x.chunks_exact(size).all(|v| c.ty.values_equal(v, r)));

    let mut new_i = ctx.alloc(nnz, RowIndex::Live(0))?;
    let mut new_x = if iso {
        reference.map(<[u8]>::to_vec).unwrap_or_default()
    } else {
        ctx.alloc(nnz * size, 0u8)?
    };

    {
        let pieces_i = split_by_counts(&mut new_i, &counts, 1);
        let unit = if iso { 0 } else { size };
        let pieces_x = split_by_counts(&mut new_x, &counts, unit);
        let fill = |(o, (ip, xp)): (usize, (&mut [RowIndex], &mut [u8]))| {
            let (a, b) = range(o);
            let mut w = 0usize;
            merge_vector(&existing[a..b], a, &pend.indices[pstart[o]..pstart[o + 1]], pstart[o], |idx, pick| {
                ip[w] = RowIndex::Live(idx);
                if !iso {
                    let dst = &mut xp[w * size..(w + 1) * size];
                    match pick {
                        Pick::Existing(p) => dst.copy_from_slice(c.value(p)),
                        Pick::Pending(q) => dst.copy_from_slice(&pend.x[q * size..(q + 1) * size]),
                        Pick::Both(p, q) => {
                            let val = &pend.x[q * size..(q + 1) * size];
                            match &combiner {
                                Some(cb) => {
                                    dst.copy_from_slice(c.value(p));
                                    cb.apply(dst, val);
                                }
                                None => dst.copy_from_slice(val),
                            }
                        }
                    }
                }
                w += 1;
            });
            debug_assert_eq!(w, ip.len());
        };
        if nnz < SMALL_NNZ_LIMIT {
            pieces_i.into_iter().zip(pieces_x).enumerate().for_each(fill);
        } else {
            pieces_i.into_par_iter().zip(pieces_x.into_par_iter()).enumerate().for_each(fill);
        }
    }

    let storage = if hyper {
        let kept = counts.iter().filter(|&&n| n > 0).count();
        let mut h = ctx.alloc_capacity(kept)?;
        let mut p = ctx.alloc_capacity(kept + 1)?;
        p.push(0);
        for (o, &n) in counts.iter().enumerate() {
            if n > 0 {
                h.push(ids[o]);
                p.push(p_all[o + 1]);
            }
        }
        Storage::Hypersparse { h, p, i: new_i }
    } else {
        Storage::Sparse { p: p_all, i: new_i }
    };

    tracing::debug!(
        nnz,
        merged = np,
        zombies_dropped = c.nzombies,
        iso,
        "pending work merged"
    );
    c.storage = storage;
    c.x = new_x;
    c.iso = iso;
    c.nzombies = 0;
    c.pending.clear();
    Ok(())
}
