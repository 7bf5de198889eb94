//! Buffered insertions not yet merged into canonical storage.

use crate::ops::BinaryOp;

/// Pending tuples in vector space: `(vector, index, value)`.
///
/// Tuples are held in append order. `sorted` stays true while every tuple
/// was appended in strictly increasing `(vector, index)` order, which lets
/// reconciliation skip its sort.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pending {
    pub vectors: Vec<usize>,
    pub indices: Vec<usize>,
    pub x: Vec<u8>,
    pub sorted: bool,
    /// Combiner for tuples landing on the same coordinate; `None` overwrites
    pub dup: Option<BinaryOp>,
}

impl Pending {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sorted: true,
            ..Self::default()
        }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Last appended coordinate, if any.
    #[inline]
    #[must_use]
    pub fn last(&self) -> Option<(usize, usize)> {
        let n = self.len();
        (n > 0).then(|| (self.vectors[n - 1], self.indices[n - 1]))
    }

    /// Append one tuple; `value` is exactly one element of the container type.
    pub fn push(&mut self, vector: usize, index: usize, value: &[u8]) {
        if let Some(prev) = self.last() {
            if (vector, index) <= prev {
                self.sorted = false;
            }
        }
        self.vectors.push(vector);
        self.indices.push(index);
        self.x.extend_from_slice(value);
    }

    /// Append a block of tuples whose internal order is already known.
    pub fn extend(&mut self, vectors: &[usize], indices: &[usize], x: &[u8], block_sorted: bool) {
        if vectors.is_empty() {
            return;
        }
        let first = (vectors[0], indices[0]);
        if !block_sorted || self.last().is_some_and(|prev| first <= prev) {
            self.sorted = false;
        }
        self.vectors.extend_from_slice(vectors);
        self.indices.extend_from_slice(indices);
        self.x.extend_from_slice(x);
    }

    /// Re-derive `sorted` after tuples were written directly into `from..`.
    pub fn note_appended(&mut self, from: usize) {
        if !self.sorted {
            return;
        }
        let start = from.max(1);
        self.sorted = (start..self.len())
            .all(|t| (self.vectors[t - 1], self.indices[t - 1]) < (self.vectors[t], self.indices[t]));
    }

    /// Drop every tuple and the dup operator.
    pub fn clear(&mut self) {
        *self = Self::new();
    }
}
