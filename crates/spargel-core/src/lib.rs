//! Core data structures for spargel (pure Rust, no parallelism)
//!
//! Containers hold type-erased values in one of four physical layouts and
//! carry their own deferred-mutation state (zombies and pending tuples).
//! All algorithms that act on them live in `spargel-kernels`.

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod alloc;
pub mod config;
pub mod error;
pub mod format;
pub mod index;
pub mod matrix;
pub mod ops;
pub mod pending;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use format::{Format, Orientation, SparsityControl};
pub use index::{IndexList, RowIndex};
pub use matrix::{Matrix, Storage};
pub use ops::{BinaryOp, Monoid, Opcode, UserBinaryFn};
pub use pending::Pending;
pub use types::{Complex32, Complex64, DataType, Scalar, TypeCode};
