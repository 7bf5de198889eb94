//! Element types.
//!
//! Container values are held type-erased as bytes; a [`DataType`] describes
//! how many bytes one value occupies and which built-in type (if any) they
//! encode. [`Scalar`] connects Rust types to their runtime descriptor.

use bytemuck::{Pod, Zeroable};
use std::fmt;

/// Runtime code of an element type.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeCode {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Fp32,
    Fp64,
    Fc32,
    Fc64,
    /// Opaque user-defined type; only byte copies are available
    User,
}

impl TypeCode {
    #[inline]
    #[must_use]
    pub const fn is_builtin(self) -> bool {
        !matches!(self, Self::User)
    }

    #[inline]
    #[must_use]
    pub const fn is_complex(self) -> bool {
        matches!(self, Self::Fc32 | Self::Fc64)
    }
}

/// Element type descriptor: code, width in bytes and display name.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct DataType {
    pub code: TypeCode,
    pub size: usize,
    pub name: &'static str,
}

impl DataType {
    pub const BOOL: Self = Self::builtin(TypeCode::Bool, 1, "bool");
    pub const INT8: Self = Self::builtin(TypeCode::Int8, 1, "int8");
    pub const INT16: Self = Self::builtin(TypeCode::Int16, 2, "int16");
    pub const INT32: Self = Self::builtin(TypeCode::Int32, 4, "int32");
    pub const INT64: Self = Self::builtin(TypeCode::Int64, 8, "int64");
    pub const UINT8: Self = Self::builtin(TypeCode::UInt8, 1, "uint8");
    pub const UINT16: Self = Self::builtin(TypeCode::UInt16, 2, "uint16");
    pub const UINT32: Self = Self::builtin(TypeCode::UInt32, 4, "uint32");
    pub const UINT64: Self = Self::builtin(TypeCode::UInt64, 8, "uint64");
    pub const FP32: Self = Self::builtin(TypeCode::Fp32, 4, "fp32");
    pub const FP64: Self = Self::builtin(TypeCode::Fp64, 8, "fp64");
    pub const FC32: Self = Self::builtin(TypeCode::Fc32, 8, "fc32");
    pub const FC64: Self = Self::builtin(TypeCode::Fc64, 16, "fc64");

    const fn builtin(code: TypeCode, size: usize, name: &'static str) -> Self {
        Self { code, size, name }
    }

    /// Describe a user-defined type of `size` bytes.
    #[must_use]
    pub const fn user(name: &'static str, size: usize) -> Self {
        Self {
            code: TypeCode::User,
            size,
            name,
        }
    }

    /// Byte equality of two values of this type.
    #[inline]
    #[must_use]
    pub fn values_equal(&self, a: &[u8], b: &[u8]) -> bool {
        a[..self.size] == b[..self.size]
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Single-precision complex value.
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Complex32 {
    pub re: f32,
    pub im: f32,
}

/// Double-precision complex value.
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Complex64 {
    pub re: f64,
    pub im: f64,
}

impl Complex32 {
    #[must_use]
    pub const fn new(re: f32, im: f32) -> Self {
        Self { re, im }
    }
}

impl Complex64 {
    #[must_use]
    pub const fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }
}

/// Rust types that can be stored in a container.
pub trait Scalar: Copy + Send + Sync + PartialEq + fmt::Debug + 'static {
    const TYPE: DataType;

    /// Write this value into `out[..Self::TYPE.size]`.
    fn write_bytes(self, out: &mut [u8]);

    /// Read a value from `bytes[..Self::TYPE.size]`; no alignment required.
    fn read_bytes(bytes: &[u8]) -> Self;

    /// Encode into a freshly allocated byte vector.
    #[inline]
    fn to_bytes(self) -> Vec<u8> {
        let mut out = vec![0u8; Self::TYPE.size];
        self.write_bytes(&mut out);
        out
    }
}

macro_rules! impl_pod_scalar {
    ($($t:ty => $dt:ident),* $(,)?) => {
        $(
            impl Scalar for $t {
                const TYPE: DataType = DataType::$dt;

                #[inline]
                fn write_bytes(self, out: &mut [u8]) {
                    out[..Self::TYPE.size].copy_from_slice(bytemuck::bytes_of(&self));
                }

                #[inline]
                fn read_bytes(bytes: &[u8]) -> Self {
                    bytemuck::pod_read_unaligned(&bytes[..Self::TYPE.size])
                }
            }
        )*
    };
}

impl_pod_scalar!(
    i8 => INT8,
    i16 => INT16,
    i32 => INT32,
    i64 => INT64,
    u8 => UINT8,
    u16 => UINT16,
    u32 => UINT32,
    u64 => UINT64,
    f32 => FP32,
    f64 => FP64,
    Complex32 => FC32,
    Complex64 => FC64,
);

// bool is not Pod; it is held as a single 0/1 byte.
impl Scalar for bool {
    const TYPE: DataType = DataType::BOOL;

    #[inline]
    fn write_bytes(self, out: &mut [u8]) {
        out[0] = u8::from(self);
    }

    #[inline]
    fn read_bytes(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}
