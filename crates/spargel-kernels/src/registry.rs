//! Numeric-kernel registry.
//!
//! Resolves a [`BinaryOp`] to something that can combine two values in
//! place. Built-in (opcode, type) pairs get a monomorphized function; user
//! operators go through the generic byte path.

use crate::cast::copy_fn;
use spargel_core::{
    BinaryOp, Complex32, Complex64, DataType, Error, Monoid, Opcode, Result, Scalar, TypeCode,
    UserBinaryFn,
};

/// `acc = op(acc, val)` on raw value bytes
pub type CombineFn = fn(&mut [u8], &[u8]);

/// Resolved combiner for one operator.
#[derive(Clone)]
pub enum Combiner {
    Builtin(CombineFn),
    /// User function plus the value width in bytes
    Generic(UserBinaryFn, usize),
}

impl Combiner {
    /// `acc = op(acc, val)`; `acc` plays the role of `x`, `val` of `y`.
    #[inline]
    pub fn apply(&self, acc: &mut [u8], val: &[u8]) {
        match self {
            Self::Builtin(f) => f(acc, val),
            Self::Generic(f, size) => {
                let size = *size;
                let mut stack = [0u8; 32];
                if size <= stack.len() {
                    stack[..size].copy_from_slice(&acc[..size]);
                    f(&mut acc[..size], &stack[..size], &val[..size]);
                } else {
                    let x = acc[..size].to_vec();
                    f(&mut acc[..size], &x, &val[..size]);
                }
            }
        }
    }
}

impl std::fmt::Debug for Combiner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Builtin(_) => f.write_str("Combiner::Builtin"),
            Self::Generic(_, size) => write!(f, "Combiner::Generic({size})"),
        }
    }
}

trait Arith: Scalar {
    fn plus(self, o: Self) -> Self;
    fn times(self, o: Self) -> Self;
}

trait Ordered: Scalar {
    fn min_of(self, o: Self) -> Self;
    fn max_of(self, o: Self) -> Self;
}

macro_rules! impl_int_ops {
    ($($t:ty),*) => {
        $(
            impl Arith for $t {
                #[inline]
                fn plus(self, o: Self) -> Self { self.wrapping_add(o) }
                #[inline]
                fn times(self, o: Self) -> Self { self.wrapping_mul(o) }
            }
            impl Ordered for $t {
                #[inline]
                fn min_of(self, o: Self) -> Self { self.min(o) }
                #[inline]
                fn max_of(self, o: Self) -> Self { self.max(o) }
            }
        )*
    };
}

impl_int_ops!(i8, i16, i32, i64, u8, u16, u32, u64);

macro_rules! impl_float_ops {
    ($($t:ty),*) => {
        $(
            impl Arith for $t {
                #[inline]
                fn plus(self, o: Self) -> Self { self + o }
                #[inline]
                fn times(self, o: Self) -> Self { self * o }
            }
            // NaN loses against a number, as in fmin/fmax
            impl Ordered for $t {
                #[inline]
                fn min_of(self, o: Self) -> Self { self.min(o) }
                #[inline]
                fn max_of(self, o: Self) -> Self { self.max(o) }
            }
        )*
    };
}

impl_float_ops!(f32, f64);

impl Arith for bool {
    #[inline]
    fn plus(self, o: Self) -> Self {
        self | o
    }
    #[inline]
    fn times(self, o: Self) -> Self {
        self & o
    }
}

impl Ordered for bool {
    #[inline]
    fn min_of(self, o: Self) -> Self {
        self & o
    }
    #[inline]
    fn max_of(self, o: Self) -> Self {
        self | o
    }
}

macro_rules! impl_complex_ops {
    ($($t:ty),*) => {
        $(
            impl Arith for $t {
                #[inline]
                fn plus(self, o: Self) -> Self {
                    Self::new(self.re + o.re, self.im + o.im)
                }
                #[inline]
                fn times(self, o: Self) -> Self {
                    Self::new(self.re * o.re - self.im * o.im, self.re * o.im + self.im * o.re)
                }
            }
        )*
    };
}

impl_complex_ops!(Complex32, Complex64);

fn op_plus<T: Arith>(acc: &mut [u8], val: &[u8]) {
    T::read_bytes(acc).plus(T::read_bytes(val)).write_bytes(acc);
}

fn op_times<T: Arith>(acc: &mut [u8], val: &[u8]) {
    T::read_bytes(acc).times(T::read_bytes(val)).write_bytes(acc);
}

fn op_min<T: Ordered>(acc: &mut [u8], val: &[u8]) {
    T::read_bytes(acc).min_of(T::read_bytes(val)).write_bytes(acc);
}

fn op_max<T: Ordered>(acc: &mut [u8], val: &[u8]) {
    T::read_bytes(acc).max_of(T::read_bytes(val)).write_bytes(acc);
}

fn op_lor(acc: &mut [u8], val: &[u8]) {
    acc[0] = u8::from(acc[0] != 0 || val[0] != 0);
}

fn op_land(acc: &mut [u8], val: &[u8]) {
    acc[0] = u8::from(acc[0] != 0 && val[0] != 0);
}

fn op_lxor(acc: &mut [u8], val: &[u8]) {
    acc[0] = u8::from((acc[0] != 0) != (val[0] != 0));
}

// First and Any keep the accumulator.
fn op_keep(_acc: &mut [u8], _val: &[u8]) {}

macro_rules! arith_kernel {
    ($f:ident, $code:expr) => {
        match $code {
            TypeCode::Bool => Some($f::<bool> as CombineFn),
            TypeCode::Int8 => Some($f::<i8> as CombineFn),
            TypeCode::Int16 => Some($f::<i16> as CombineFn),
            TypeCode::Int32 => Some($f::<i32> as CombineFn),
            TypeCode::Int64 => Some($f::<i64> as CombineFn),
            TypeCode::UInt8 => Some($f::<u8> as CombineFn),
            TypeCode::UInt16 => Some($f::<u16> as CombineFn),
            TypeCode::UInt32 => Some($f::<u32> as CombineFn),
            TypeCode::UInt64 => Some($f::<u64> as CombineFn),
            TypeCode::Fp32 => Some($f::<f32> as CombineFn),
            TypeCode::Fp64 => Some($f::<f64> as CombineFn),
            TypeCode::Fc32 => Some($f::<Complex32> as CombineFn),
            TypeCode::Fc64 => Some($f::<Complex64> as CombineFn),
            TypeCode::User => None,
        }
    };
}

macro_rules! ordered_kernel {
    ($f:ident, $code:expr) => {
        match $code {
            TypeCode::Bool => Some($f::<bool> as CombineFn),
            TypeCode::Int8 => Some($f::<i8> as CombineFn),
            TypeCode::Int16 => Some($f::<i16> as CombineFn),
            TypeCode::Int32 => Some($f::<i32> as CombineFn),
            TypeCode::Int64 => Some($f::<i64> as CombineFn),
            TypeCode::UInt8 => Some($f::<u8> as CombineFn),
            TypeCode::UInt16 => Some($f::<u16> as CombineFn),
            TypeCode::UInt32 => Some($f::<u32> as CombineFn),
            TypeCode::UInt64 => Some($f::<u64> as CombineFn),
            TypeCode::Fp32 => Some($f::<f32> as CombineFn),
            TypeCode::Fp64 => Some($f::<f64> as CombineFn),
            TypeCode::Fc32 | TypeCode::Fc64 | TypeCode::User => None,
        }
    };
}

fn unsupported(op: &BinaryOp) -> Error {
    Error::UnsupportedOperator {
        op: op.name().into(),
        ty: op.ty.name.into(),
    }
}

/// Resolve `op` to a combiner, or `UnsupportedOperator`.
pub fn resolve(op: &BinaryOp) -> Result<Combiner> {
    let code = op.ty.code;
    let builtin = match op.opcode {
        Opcode::User => {
            return op
                .func()
                .map(|f| Combiner::Generic(f.clone(), op.ty.size))
                .ok_or_else(|| unsupported(op));
        }
        Opcode::First | Opcode::Any => Some(op_keep as CombineFn),
        Opcode::Second => Some(copy_fn(op.ty.size)),
        Opcode::Plus => arith_kernel!(op_plus, code),
        Opcode::Times => arith_kernel!(op_times, code),
        Opcode::Min => ordered_kernel!(op_min, code),
        Opcode::Max => ordered_kernel!(op_max, code),
        Opcode::Lor => (code == TypeCode::Bool).then_some(op_lor as CombineFn),
        Opcode::Land => (code == TypeCode::Bool).then_some(op_land as CombineFn),
        Opcode::Lxor => (code == TypeCode::Bool).then_some(op_lxor as CombineFn),
    };
    builtin.map(Combiner::Builtin).ok_or_else(|| unsupported(op))
}

/// Lowest and highest value of a built-in ordered type, as bytes.
fn bounds(ty: &DataType) -> Option<(Vec<u8>, Vec<u8>)> {
    macro_rules! int_bounds {
        ($t:ty) => {
            Some(((<$t>::MIN).to_bytes(), (<$t>::MAX).to_bytes()))
        };
    }
    match ty.code {
        TypeCode::Bool => Some((false.to_bytes(), true.to_bytes())),
        TypeCode::Int8 => int_bounds!(i8),
        TypeCode::Int16 => int_bounds!(i16),
        TypeCode::Int32 => int_bounds!(i32),
        TypeCode::Int64 => int_bounds!(i64),
        TypeCode::UInt8 => int_bounds!(u8),
        TypeCode::UInt16 => int_bounds!(u16),
        TypeCode::UInt32 => int_bounds!(u32),
        TypeCode::UInt64 => int_bounds!(u64),
        TypeCode::Fp32 => Some((f32::NEG_INFINITY.to_bytes(), f32::INFINITY.to_bytes())),
        TypeCode::Fp64 => Some((f64::NEG_INFINITY.to_bytes(), f64::INFINITY.to_bytes())),
        TypeCode::Fc32 | TypeCode::Fc64 | TypeCode::User => None,
    }
}

/// `one` of a built-in type (true for bool).
fn one(ty: &DataType) -> Option<Vec<u8>> {
    Some(match ty.code {
        TypeCode::Bool => true.to_bytes(),
        TypeCode::Int8 => 1i8.to_bytes(),
        TypeCode::Int16 => 1i16.to_bytes(),
        TypeCode::Int32 => 1i32.to_bytes(),
        TypeCode::Int64 => 1i64.to_bytes(),
        TypeCode::UInt8 => 1u8.to_bytes(),
        TypeCode::UInt16 => 1u16.to_bytes(),
        TypeCode::UInt32 => 1u32.to_bytes(),
        TypeCode::UInt64 => 1u64.to_bytes(),
        TypeCode::Fp32 => 1f32.to_bytes(),
        TypeCode::Fp64 => 1f64.to_bytes(),
        TypeCode::Fc32 => Complex32::new(1.0, 0.0).to_bytes(),
        TypeCode::Fc64 => Complex64::new(1.0, 0.0).to_bytes(),
        TypeCode::User => return None,
    })
}

/// Built-in monoid for `opcode` over `ty`, with its identity and terminal.
///
/// Integer `times` has 0 as terminal, `min`/`max` the type bounds, `lor`
/// true and `land` false. Float `plus`/`times` have no terminal.
pub fn builtin_monoid(opcode: Opcode, ty: DataType) -> Result<Monoid> {
    let op = BinaryOp::builtin(opcode, ty);
    resolve(&op)?;
    let zero = vec![0u8; ty.size];
    let integral = !matches!(
        ty.code,
        TypeCode::Fp32 | TypeCode::Fp64 | TypeCode::Fc32 | TypeCode::Fc64 | TypeCode::User
    );
    let (identity, terminal) = match opcode {
        Opcode::Plus => (zero, (ty.code == TypeCode::Bool).then(|| true.to_bytes())),
        Opcode::Times => {
            let id = one(&ty).ok_or_else(|| unsupported(&op))?;
            (id, integral.then_some(zero))
        }
        Opcode::Min => {
            let (lo, hi) = bounds(&ty).ok_or_else(|| unsupported(&op))?;
            (hi, Some(lo))
        }
        Opcode::Max => {
            let (lo, hi) = bounds(&ty).ok_or_else(|| unsupported(&op))?;
            (lo, Some(hi))
        }
        Opcode::Lor => (false.to_bytes(), Some(true.to_bytes())),
        Opcode::Land => (true.to_bytes(), Some(false.to_bytes())),
        Opcode::Lxor => (false.to_bytes(), None),
        // the first value seen terminates the reduction
        Opcode::Any => (zero, None),
        Opcode::First | Opcode::Second | Opcode::User => return Err(unsupported(&op)),
    };
    Monoid::new(op, identity, terminal)
}
