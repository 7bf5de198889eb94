//! Operators as values.
//!
//! A `BinaryOp` names what to compute; the kernel registry decides how.
//! Built-in operators carry no function and resolve to typed kernels, user
//! operators carry a byte-level function that the generic path calls.

use crate::error::{Error, Result};
use crate::types::DataType;
use std::fmt;
use std::sync::Arc;

/// `z = f(x, y)` over raw value bytes of the operator's type
pub type UserBinaryFn = Arc<dyn Fn(&mut [u8], &[u8], &[u8]) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    First,
    Second,
    Any,
    Plus,
    Times,
    Min,
    Max,
    Lor,
    Land,
    Lxor,
    User,
}

impl Opcode {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::First => "first",
            Self::Second => "second",
            Self::Any => "any",
            Self::Plus => "plus",
            Self::Times => "times",
            Self::Min => "min",
            Self::Max => "max",
            Self::Lor => "lor",
            Self::Land => "land",
            Self::Lxor => "lxor",
            Self::User => "user",
        }
    }
}

#[derive(Clone)]
pub struct BinaryOp {
    pub opcode: Opcode,
    pub ty: DataType,
    name: &'static str,
    func: Option<UserBinaryFn>,
}

impl BinaryOp {
    #[must_use]
    pub const fn builtin(opcode: Opcode, ty: DataType) -> Self {
        Self {
            opcode,
            ty,
            name: opcode.name(),
            func: None,
        }
    }

    /// A user operator; `f` receives `z`, `x`, `y` each of `ty.size` bytes.
    #[must_use]
    pub fn user(name: &'static str, ty: DataType, f: UserBinaryFn) -> Self {
        Self {
            opcode: Opcode::User,
            ty,
            name,
            func: Some(f),
        }
    }

    #[must_use]
    pub const fn first(ty: DataType) -> Self {
        Self::builtin(Opcode::First, ty)
    }

    #[must_use]
    pub const fn second(ty: DataType) -> Self {
        Self::builtin(Opcode::Second, ty)
    }

    #[must_use]
    pub const fn plus(ty: DataType) -> Self {
        Self::builtin(Opcode::Plus, ty)
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn func(&self) -> Option<&UserBinaryFn> {
        self.func.as_ref()
    }

    /// `f(x, x) == x` for every x, so duplicates of one value stay that value.
    #[must_use]
    pub const fn is_idempotent(&self) -> bool {
        matches!(
            self.opcode,
            Opcode::First | Opcode::Second | Opcode::Any | Opcode::Min | Opcode::Max | Opcode::Lor | Opcode::Land
        )
    }
}

impl PartialEq for BinaryOp {
    fn eq(&self, other: &Self) -> bool {
        let same_fn = match (&self.func, &other.func) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        };
        self.opcode == other.opcode && self.ty == other.ty && self.name == other.name && same_fn
    }
}

impl fmt::Debug for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinaryOp")
            .field("name", &self.name)
            .field("opcode", &self.opcode)
            .field("ty", &self.ty.name)
            .finish()
    }
}

/// An associative operator with an identity and an optional terminal
/// (absorbing) value.
#[derive(Clone, Debug, PartialEq)]
pub struct Monoid {
    pub op: BinaryOp,
    pub identity: Vec<u8>,
    pub terminal: Option<Vec<u8>>,
}

impl Monoid {
    pub fn new(op: BinaryOp, identity: Vec<u8>, terminal: Option<Vec<u8>>) -> Result<Self> {
        let size = op.ty.size;
        if identity.len() != size {
            return Err(Error::InvalidObject(format!(
                "monoid identity must be {size} bytes, got {}",
                identity.len()
            )));
        }
        if terminal.as_ref().is_some_and(|t| t.len() != size) {
            return Err(Error::InvalidObject(format!("monoid terminal must be {size} bytes")));
        }
        Ok(Self { op, identity, terminal })
    }

    #[inline]
    #[must_use]
    pub fn is_terminal(&self, z: &[u8]) -> bool {
        self.terminal
            .as_deref()
            .is_some_and(|t| self.op.ty.values_equal(z, t))
    }
}
