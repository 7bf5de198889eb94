//! Error types for spargel

use thiserror::Error;

/// Result type alias using spargel's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by container construction and kernels.
///
/// Violated internal invariants are not represented here; they are
/// `debug_assert!`s inside the kernels.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// An allocation could not be satisfied (or exceeded the configured limit)
    #[error("Out of memory: failed to allocate {bytes} bytes")]
    OutOfMemory {
        /// Requested size in bytes
        bytes: usize,
    },

    /// A row/column index lies outside the container
    #[error("Index {index} out of bounds for dimension of size {bound}")]
    IndexOutOfBounds {
        /// The invalid index
        index: usize,
        /// Size of the dimension
        bound: usize,
    },

    /// Mask, source or tile shape incompatible with the target
    #[error("Dimension mismatch: expected {expected:?}, got {got:?}")]
    DimensionMismatch {
        /// Expected (rows, cols)
        expected: (usize, usize),
        /// Actual (rows, cols)
        got: (usize, usize),
    },

    /// No kernel for this operator and no generic fallback
    #[error("Unsupported operator '{op}' for type '{ty}'")]
    UnsupportedOperator {
        /// Operator name
        op: String,
        /// Element type name
        ty: String,
    },

    /// No cast exists between the two element types
    #[error("Cannot cast values of type '{from}' to '{to}'")]
    DomainMismatch {
        /// Source type name
        from: String,
        /// Destination type name
        to: String,
    },

    /// Malformed index selection (duplicates, zero stride)
    #[error("Invalid index selection: {0}")]
    InvalidIndex(String),

    /// Raw parts handed to a constructor do not describe a valid container
    #[error("Invalid object: {0}")]
    InvalidObject(String),

    /// The container holds zombies or pending tuples and must be reconciled first
    #[error("Container has pending work; reconcile it before reading canonical storage")]
    PendingWork,
}
