//! Fallible allocation.
//!
//! Every sizeable array the engine allocates goes through here so that a
//! failed (or over-limit) allocation surfaces as `Error::OutOfMemory`
//! instead of aborting the process.

use crate::error::{Error, Result};

/// `n` copies of `fill`, or `OutOfMemory` if the request exceeds `limit`
/// bytes or the allocator refuses it.
pub fn try_filled<T: Clone>(n: usize, fill: T, limit: Option<usize>) -> Result<Vec<T>> {
    let mut v = try_with_capacity::<T>(n, limit)?;
    v.resize(n, fill);
    Ok(v)
}

/// Empty vector with room for `n` elements.
pub fn try_with_capacity<T>(n: usize, limit: Option<usize>) -> Result<Vec<T>> {
    let bytes = n
        .checked_mul(std::mem::size_of::<T>())
        .ok_or(Error::OutOfMemory { bytes: usize::MAX })?;
    if limit.is_some_and(|cap| bytes > cap) {
        return Err(Error::OutOfMemory { bytes });
    }
    let mut v = Vec::new();
    v.try_reserve_exact(n)
        .map_err(|_| Error::OutOfMemory { bytes })?;
    Ok(v)
}

/// Grow `v` by `additional` elements worth of capacity.
pub fn try_reserve<T>(v: &mut Vec<T>, additional: usize, limit: Option<usize>) -> Result<()> {
    let bytes = additional
        .checked_mul(std::mem::size_of::<T>())
        .ok_or(Error::OutOfMemory { bytes: usize::MAX })?;
    if limit.is_some_and(|cap| bytes > cap) {
        return Err(Error::OutOfMemory { bytes });
    }
    v.try_reserve(additional)
        .map_err(|_| Error::OutOfMemory { bytes })
}

/// `vlen * vdim` cells, or `OutOfMemory` on overflow.
pub fn cell_count(vlen: usize, vdim: usize) -> Result<usize> {
    vlen.checked_mul(vdim).ok_or(Error::OutOfMemory { bytes: usize::MAX })
}
