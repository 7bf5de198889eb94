//! Cast registry and width-dispatched value copies.
//!
//! `cast_factory(dst, src)` returns a function converting `count` packed
//! values of type `src` into type `dst`. Casts follow Rust `as` semantics:
//! float to int saturates (NaN becomes 0), int to int wraps, complex to
//! real keeps the real part, anything to bool tests `!= 0`.

use rayon::prelude::*;
use spargel_core::{Complex32, Complex64, DataType, Error, Result, Scalar, TypeCode};

/// `dst[..count]` = cast of `src[..count]`, values packed back to back
pub type CastFn = fn(&mut [u8], &[u8], usize);

/// Copy exactly one value of a known width
pub type CopyFn = fn(&mut [u8], &[u8]);

/// Common intermediate for built-in casts
#[derive(Clone, Copy, Debug)]
enum Wide {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Complex(f64, f64),
}

trait Castable: Scalar {
    fn widen(self) -> Wide;
    fn narrow(w: Wide) -> Self;
}

macro_rules! impl_castable_int {
    ($($t:ty => $wide:ident as $via:ty),* $(,)?) => {
        $(
            impl Castable for $t {
                #[inline]
                fn widen(self) -> Wide {
                    Wide::$wide(self as $via)
                }

                #[inline]
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_possible_wrap)]
                fn narrow(w: Wide) -> Self {
                    match w {
                        Wide::Bool(b) => Self::from(b),
                        Wide::Int(v) => v as Self,
                        Wide::UInt(v) => v as Self,
                        Wide::Float(f) | Wide::Complex(f, _) => f as Self,
                    }
                }
            }
        )*
    };
}

impl_castable_int!(
    i8 => Int as i64,
    i16 => Int as i64,
    i32 => Int as i64,
    i64 => Int as i64,
    u8 => UInt as u64,
    u16 => UInt as u64,
    u32 => UInt as u64,
    u64 => UInt as u64,
);

macro_rules! impl_castable_float {
    ($($t:ty),*) => {
        $(
            impl Castable for $t {
                #[inline]
                fn widen(self) -> Wide {
                    Wide::Float(f64::from(self))
                }

                #[inline]
                #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
                fn narrow(w: Wide) -> Self {
                    match w {
                        Wide::Bool(b) => Self::from(u8::from(b)),
                        Wide::Int(v) => v as Self,
                        Wide::UInt(v) => v as Self,
                        Wide::Float(f) | Wide::Complex(f, _) => f as Self,
                    }
                }
            }
        )*
    };
}

impl_castable_float!(f32, f64);

impl Castable for bool {
    #[inline]
    fn widen(self) -> Wide {
        Wide::Bool(self)
    }

    #[inline]
    fn narrow(w: Wide) -> Self {
        match w {
            Wide::Bool(b) => b,
            Wide::Int(v) => v != 0,
            Wide::UInt(v) => v != 0,
            Wide::Float(f) => f != 0.0,
            Wide::Complex(re, im) => re != 0.0 || im != 0.0,
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn wide_parts(w: Wide) -> (f64, f64) {
    match w {
        Wide::Bool(b) => (f64::from(u8::from(b)), 0.0),
        Wide::Int(v) => (v as f64, 0.0),
        Wide::UInt(v) => (v as f64, 0.0),
        Wide::Float(f) => (f, 0.0),
        Wide::Complex(re, im) => (re, im),
    }
}

impl Castable for Complex32 {
    #[inline]
    fn widen(self) -> Wide {
        Wide::Complex(f64::from(self.re), f64::from(self.im))
    }

    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    fn narrow(w: Wide) -> Self {
        let (re, im) = wide_parts(w);
        Self::new(re as f32, im as f32)
    }
}

impl Castable for Complex64 {
    #[inline]
    fn widen(self) -> Wide {
        Wide::Complex(self.re, self.im)
    }

    #[inline]
    fn narrow(w: Wide) -> Self {
        let (re, im) = wide_parts(w);
        Self::new(re, im)
    }
}

fn cast_slice<D: Castable, S: Castable>(dst: &mut [u8], src: &[u8], count: usize) {
    let dsize = D::TYPE.size;
    let ssize = S::TYPE.size;
    for k in 0..count {
        let v = S::read_bytes(&src[k * ssize..(k + 1) * ssize]);
        D::narrow(v.widen()).write_bytes(&mut dst[k * dsize..(k + 1) * dsize]);
    }
}

macro_rules! by_source {
    ($d:ty, $src:expr) => {
        match $src {
            TypeCode::Bool => Some(cast_slice::<$d, bool> as CastFn),
            TypeCode::Int8 => Some(cast_slice::<$d, i8> as CastFn),
            TypeCode::Int16 => Some(cast_slice::<$d, i16> as CastFn),
            TypeCode::Int32 => Some(cast_slice::<$d, i32> as CastFn),
            TypeCode::Int64 => Some(cast_slice::<$d, i64> as CastFn),
            TypeCode::UInt8 => Some(cast_slice::<$d, u8> as CastFn),
            TypeCode::UInt16 => Some(cast_slice::<$d, u16> as CastFn),
            TypeCode::UInt32 => Some(cast_slice::<$d, u32> as CastFn),
            TypeCode::UInt64 => Some(cast_slice::<$d, u64> as CastFn),
            TypeCode::Fp32 => Some(cast_slice::<$d, f32> as CastFn),
            TypeCode::Fp64 => Some(cast_slice::<$d, f64> as CastFn),
            TypeCode::Fc32 => Some(cast_slice::<$d, Complex32> as CastFn),
            TypeCode::Fc64 => Some(cast_slice::<$d, Complex64> as CastFn),
            TypeCode::User => None,
        }
    };
}

/// Cast function for a pair of built-in type codes; `None` if either is user-defined.
#[must_use]
pub fn cast_factory(dst: TypeCode, src: TypeCode) -> Option<CastFn> {
    match dst {
        TypeCode::Bool => by_source!(bool, src),
        TypeCode::Int8 => by_source!(i8, src),
        TypeCode::Int16 => by_source!(i16, src),
        TypeCode::Int32 => by_source!(i32, src),
        TypeCode::Int64 => by_source!(i64, src),
        TypeCode::UInt8 => by_source!(u8, src),
        TypeCode::UInt16 => by_source!(u16, src),
        TypeCode::UInt32 => by_source!(u32, src),
        TypeCode::UInt64 => by_source!(u64, src),
        TypeCode::Fp32 => by_source!(f32, src),
        TypeCode::Fp64 => by_source!(f64, src),
        TypeCode::Fc32 => by_source!(Complex32, src),
        TypeCode::Fc64 => by_source!(Complex64, src),
        TypeCode::User => None,
    }
}

#[inline]
fn copy_fixed<const N: usize>(dst: &mut [u8], src: &[u8]) {
    dst[..N].copy_from_slice(&src[..N]);
}

#[inline]
fn copy_any(dst: &mut [u8], src: &[u8]) {
    dst[..src.len()].copy_from_slice(src);
}

/// Width-specialized single-value copy: 1/2/4/8/16 bytes get a fixed-size
/// move, any other width a plain byte copy of `src.len()` bytes.
#[must_use]
pub fn copy_fn(size: usize) -> CopyFn {
    match size {
        1 => copy_fixed::<1>,
        2 => copy_fixed::<2>,
        4 => copy_fixed::<4>,
        8 => copy_fixed::<8>,
        16 => copy_fixed::<16>,
        _ => copy_any,
    }
}

/// How values move from one element type to another.
#[derive(Clone, Copy, Debug)]
pub enum Caster {
    /// Same type: raw copy of `size` bytes per value
    Copy { size: usize, copy: CopyFn },
    /// Built-in conversion
    Convert { dsize: usize, ssize: usize, cast: CastFn },
}

impl Caster {
    /// Cast one value.
    #[inline]
    pub fn one(&self, dst: &mut [u8], src: &[u8]) {
        match *self {
            Self::Copy { size, copy } => copy(&mut dst[..size], &src[..size]),
            Self::Convert { cast, .. } => cast(dst, src, 1),
        }
    }

    /// Cast `count` packed values.
    #[inline]
    pub fn many(&self, dst: &mut [u8], src: &[u8], count: usize) {
        match *self {
            Self::Copy { size, .. } => dst[..count * size].copy_from_slice(&src[..count * size]),
            Self::Convert { cast, .. } => cast(dst, src, count),
        }
    }

    #[must_use]
    pub const fn is_copy(&self) -> bool {
        matches!(self, Self::Copy { .. })
    }

    #[must_use]
    pub const fn sizes(&self) -> (usize, usize) {
        match *self {
            Self::Copy { size, .. } => (size, size),
            Self::Convert { dsize, ssize, .. } => (dsize, ssize),
        }
    }
}

/// Resolve how to move `src` values into `dst`.
pub fn caster(dst: &DataType, src: &DataType) -> Result<Caster> {
    if dst == src {
        return Ok(Caster::Copy {
            size: dst.size,
            copy: copy_fn(dst.size),
        });
    }
    cast_factory(dst.code, src.code)
        .map(|cast| Caster::Convert {
            dsize: dst.size,
            ssize: src.size,
            cast,
        })
        .ok_or_else(|| Error::DomainMismatch {
            from: src.name.into(),
            to: dst.name.into(),
        })
}

/// Cast a single value into a new buffer.
pub fn cast_value(dst: &DataType, src: &DataType, value: &[u8]) -> Result<Vec<u8>> {
    let c = caster(dst, src)?;
    let mut out = vec![0u8; dst.size];
    c.one(&mut out, value);
    Ok(out)
}

/// Cast a packed array in parallel chunks.
pub fn cast_array(dst: &mut [u8], src: &[u8], count: usize, c: &Caster) {
    const CHUNK: usize = 8192;
    let (dsize, ssize) = c.sizes();
    if dsize == 0 || count == 0 {
        return;
    }
    dst[..count * dsize]
        .par_chunks_mut(CHUNK * dsize)
        .zip(src[..count * ssize].par_chunks(CHUNK * ssize))
        .for_each(|(d, s)| c.many(d, s, d.len() / dsize));
}

/// Value of one packed entry as bool (mask test).
#[inline]
#[must_use]
pub fn as_bool(cast_to_bool: &Caster, value: &[u8]) -> bool {
    let mut b = [0u8; 1];
    cast_to_bool.one(&mut b, value);
    b[0] != 0
}
