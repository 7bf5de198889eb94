//! Shared thresholds and small helpers for the kernels
//
// Block sizes follow the stripe sizes used by the reductions; the prefix-sum
// helper is the single place where per-task counts become disjoint offsets.

/// Below this many entries a kernel runs sequentially
pub const SMALL_NNZ_LIMIT: usize = 16 * 1024;
/// Chunk length for parallel reductions over value arrays
pub const STRIPE: usize = 4096;

/// Exclusive prefix sum into a new array of length `counts.len() + 1`.
#[inline]
#[must_use]
pub fn offsets(counts: &[usize]) -> Vec<usize> {
    let mut out = Vec::with_capacity(counts.len() + 1);
    let mut total = 0usize;
    out.push(0);
    for &c in counts {
        total += c;
        out.push(total);
    }
    out
}

/// Split `buf` into consecutive mutable pieces of `sizes[t] * unit` elements.
///
/// The pieces are disjoint by construction, so they can be handed to
/// independent tasks without synchronization.
pub fn split_by_counts<'a, T>(mut buf: &'a mut [T], sizes: &[usize], unit: usize) -> Vec<&'a mut [T]> {
    let mut out = Vec::with_capacity(sizes.len());
    for &n in sizes {
        let (head, tail) = buf.split_at_mut(n * unit);
        out.push(head);
        buf = tail;
    }
    out
}
