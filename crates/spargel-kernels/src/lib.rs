//! Parallel kernels for spargel (pure Rust, rayon + SIMD)
//!
//! Every kernel takes a [`Context`] and runs its parallel work on the
//! context's pool.

pub mod build;
pub mod cast;
pub mod concat;
pub mod context;
pub mod convert;
pub mod ledger;
pub mod reconcile;
pub mod reduce;
pub mod registry;
pub mod slice;
pub mod subassign;
pub mod transpose;
pub mod utility;

pub use build::{build, build_from, extract, extract_tuples, Tuples};
pub use cast::{cast_factory, caster, copy_fn, Caster};
pub use concat::{concat, tile_bounds, TileBounds};
pub use context::Context;
pub use convert::{cast_values, conform, convert_to, ensure_format, finalized};
pub use ledger::{append_pending, get_element, mark_zombie, remove_element, set_element, undelete};
pub use reconcile::{reconcile, reconcile_with};
pub use reduce::{reduce, reduce_to_scalar};
pub use registry::{builtin_monoid, resolve, Combiner};
pub use slice::{slice, slice_pointers, Pointers, TaskDesc};
pub use subassign::{assign_scalar, subassign, AssignSource};
pub use transpose::{aligned, reorient};
