//! Reduce all entries of a container to one scalar with a monoid.

#![allow(
    clippy::many_single_char_names,
    reason = "Sparse kernels conventionally use i/j/k/p for indices"
)]

use crate::cast::{caster, Caster};
use crate::context::Context;
use crate::convert;
use crate::registry::{self, Combiner};
use crate::utility::util::{SMALL_NNZ_LIMIT, STRIPE};
use rayon::prelude::*;
use spargel_core::{DataType, Error, Matrix, Monoid, Opcode, Result, Scalar, Storage, TypeCode};
use std::borrow::Cow;
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use thread_local::ThreadLocal;
use wide::f64x4;

/// Typed reduction; the monoid's type must be `T`.
pub fn reduce<T: Scalar>(ctx: &Context, a: &Matrix, monoid: &Monoid) -> Result<T> {
    if monoid.op.ty != T::TYPE {
        return Err(Error::DomainMismatch {
            from: monoid.op.ty.name.into(),
            to: T::TYPE.name.into(),
        });
    }
    reduce_to_scalar(ctx, a, monoid).map(|z| T::read_bytes(&z))
}

/// Fold every live entry of `a` with `monoid`, values cast to the monoid's
/// type. An empty container reduces to the identity.
///
/// Pending tuples are reconciled on a scratch copy; zombies are skipped in
/// place.
pub fn reduce_to_scalar(ctx: &Context, a: &Matrix, monoid: &Monoid) -> Result<Vec<u8>> {
    let ty = monoid.op.ty;
    let cast = caster(&ty, &a.ty)?;
    let combiner = registry::resolve(&monoid.op)?;
    let a: Cow<'_, Matrix> = if a.pending.is_empty() {
        Cow::Borrowed(a)
    } else {
        convert::finalized(ctx, a)?
    };
    let live = match &a.storage {
        Storage::Full | Storage::Bitmap { .. } => a.entries_held(),
        Storage::Sparse { .. } | Storage::Hypersparse { .. } => a.entries_held() - a.nzombies,
    };
    tracing::trace!(live, op = monoid.op.name(), "reduce");
    if live == 0 {
        return Ok(monoid.identity.clone());
    }
    let mut v = vec![0u8; ty.size];
    if a.iso {
        cast.one(&mut v, a.value(0));
        return Ok(if monoid.op.opcode == Opcode::Any {
            v
        } else {
            repeat(&combiner, v, live)
        });
    }
    if monoid.op.opcode == Opcode::Any {
        // any live entry will do
        let p = (0..slots(&a)).into_par_iter().find_any(|&p| is_live(&a, p));
        if let Some(p) = p {
            cast.one(&mut v, a.value(p));
            return Ok(v);
        }
        return Ok(monoid.identity.clone());
    }
    if ty.code == TypeCode::Fp64
        && a.ty == DataType::FP64
        && monoid.op.opcode == Opcode::Plus
        && a.nzombies == 0
        && !matches!(a.storage, Storage::Bitmap { .. })
    {
        let sum = ctx.install(|| sum_f64(&a.x));
        return Ok(sum.to_ne_bytes().to_vec());
    }
    Ok(ctx.install(|| fold(ctx, &a, monoid, &combiner, &cast)))
}

/// Value or cell slots of `a` (live or not).
fn slots(a: &Matrix) -> usize {
    match &a.storage {
        Storage::Full | Storage::Bitmap { .. } => a.vlen * a.vdim,
        Storage::Sparse { i, .. } | Storage::Hypersparse { i, .. } => i.len(),
    }
}

#[inline]
fn is_live(a: &Matrix, p: usize) -> bool {
    match &a.storage {
        Storage::Full => true,
        Storage::Bitmap { b } => b[p] != 0,
        Storage::Sparse { i, .. } | Storage::Hypersparse { i, .. } => !i[p].is_zombie(),
    }
}

/// `v op v op ... op v` (`n` times) by repeated doubling.
fn repeat(combiner: &Combiner, v: Vec<u8>, n: usize) -> Vec<u8> {
    let mut result: Option<Vec<u8>> = None;
    let mut base = v;
    let mut k = n;
    while k > 0 {
        if k & 1 == 1 {
            result = Some(match result {
                None => base.clone(),
                Some(mut r) => {
                    combiner.apply(&mut r, &base);
                    r
                }
            });
        }
        k >>= 1;
        if k > 0 {
            let twin = base.clone();
            combiner.apply(&mut base, &twin);
        }
    }
    result.unwrap_or(base)
}

/// Fold positions `s..e` into `acc`; returns true once `acc` is terminal.
#[inline]
fn fold_range(a: &Matrix, monoid: &Monoid, combiner: &Combiner, cast: &Caster, s: usize, e: usize, acc: &mut [u8]) -> bool {
    let mut tmp = [0u8; 16];
    let size = monoid.op.ty.size;
    let mut spill = if size > tmp.len() { vec![0u8; size] } else { Vec::new() };
    for p in s..e {
        if !is_live(a, p) {
            continue;
        }
        let value = a.value(p);
        if cast.is_copy() {
            combiner.apply(acc, value);
        } else {
            let buf = if spill.is_empty() { &mut tmp[..size] } else { &mut spill[..] };
            cast.one(buf, value);
            combiner.apply(acc, buf);
        }
        if monoid.is_terminal(acc) {
            return true;
        }
    }
    false
}

fn fold(ctx: &Context, a: &Matrix, monoid: &Monoid, combiner: &Combiner, cast: &Caster) -> Vec<u8> {
    let n = slots(a);
    if n < SMALL_NNZ_LIMIT || ctx.nthreads_for(n) == 1 {
        let mut acc = monoid.identity.clone();
        fold_range(a, monoid, combiner, cast, 0, n, &mut acc);
        return acc;
    }
    let done = AtomicBool::new(false);
    let tls: ThreadLocal<RefCell<Vec<u8>>> = ThreadLocal::new();
    (0..n.div_ceil(STRIPE)).into_par_iter().for_each(|c| {
        if done.load(Ordering::Relaxed) {
            return;
        }
        let cell = tls.get_or(|| RefCell::new(monoid.identity.clone()));
        let mut acc = cell.borrow_mut();
        let s = c * STRIPE;
        if fold_range(a, monoid, combiner, cast, s, (s + STRIPE).min(n), &mut acc) {
            done.store(true, Ordering::Relaxed);
        }
    });
    let mut out = monoid.identity.clone();
    for cell in tls {
        combiner.apply(&mut out, &cell.into_inner());
    }
    if done.load(Ordering::Relaxed) {
        tracing::trace!("reduction reached the terminal value");
    }
    out
}

/// Sum of a packed fp64 value array, SIMD inside stripes.
fn sum_f64(x: &[u8]) -> f64 {
    let read = |b: &[u8]| bytemuck::pod_read_unaligned::<f64>(&b[..8]);
    x.par_chunks(STRIPE * 8)
        .map(|chunk| {
            let mut accv = f64x4::from([0.0; 4]);
            let mut quads = chunk.chunks_exact(32);
            for q in quads.by_ref() {
                accv += f64x4::from([read(&q[0..]), read(&q[8..]), read(&q[16..]), read(&q[24..])]);
            }
            let arr = accv.to_array();
            let mut acc = arr[0] + arr[1] + arr[2] + arr[3];
            for v in quads.remainder().chunks_exact(8) {
                acc += read(v);
            }
            acc
        })
        .sum()
}
