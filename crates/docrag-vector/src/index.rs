use std::ops::Range;

use docrag_core::error::{Error, Result};
use docrag_core::types::Embedding;

/// Exact nearest-neighbour index over squared Euclidean distance.
///
/// The dimension is fixed by the first inserted vector. Slots are assigned in
/// insertion order and never reused.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatIndex {
    dimension: Option<usize>,
    vectors: Vec<Embedding>,
}

impl FlatIndex {
    pub fn new() -> Self { Self::default() }

    /// Rebuild an index from persisted vectors, re-checking every length.
    pub fn from_vectors(dimension: Option<usize>, vectors: Vec<Embedding>) -> Result<Self> {
        let mut index = Self { dimension, vectors: Vec::new() };
        if !vectors.is_empty() {
            index.insert(vectors)?;
        }
        Ok(index)
    }

    pub fn dimension(&self) -> Option<usize> { self.dimension }
    pub fn len(&self) -> usize { self.vectors.len() }
    pub fn is_empty(&self) -> bool { self.vectors.is_empty() }

    pub fn vector(&self, slot: usize) -> Option<&[f32]> {
        self.vectors.get(slot).map(Vec::as_slice)
    }

    pub fn vectors(&self) -> &[Embedding] { &self.vectors }

    /// Dimension the batch would be stored under, or the error `insert` would
    /// return. Does not modify the index.
    pub fn check_batch(&self, vectors: &[Embedding]) -> Result<usize> {
        let Some(first) = vectors.first() else {
            return Err(Error::InvalidArgument("empty vector batch".into()));
        };
        let expected = self.dimension.unwrap_or(first.len());
        if expected == 0 {
            return Err(Error::InvalidArgument("zero-length vectors cannot be indexed".into()));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
            return Err(Error::DimensionMismatch { expected, got: bad.len() });
        }
        // NaN and infinities cannot be persisted as JSON numbers
        if let Some(row) = vectors.iter().position(|v| !is_finite(v)) {
            return Err(Error::InvalidArgument(format!("vector {row} of the batch has a non-finite component")));
        }
        Ok(expected)
    }

    /// Append a batch and return the slots it occupies. On error nothing is
    /// appended.
    pub fn insert(&mut self, vectors: Vec<Embedding>) -> Result<Range<usize>> {
        let dim = self.check_batch(&vectors)?;
        let start = self.vectors.len();
        self.dimension = Some(dim);
        self.vectors.extend(vectors);
        Ok(start..self.vectors.len())
    }

    /// The `min(k, len)` closest slots with their squared distances, nearest
    /// first. Equal distances keep the lower slot first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>> {
        if k == 0 {
            return Err(Error::InvalidArgument("k must be at least 1".into()));
        }
        let Some(dim) = self.dimension.filter(|_| !self.vectors.is_empty()) else {
            return Ok(Vec::new());
        };
        if query.len() != dim {
            return Err(Error::DimensionMismatch { expected: dim, got: query.len() });
        }
        if !is_finite(query) {
            return Err(Error::InvalidArgument("query vector has a non-finite component".into()));
        }

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(slot, v)| (slot, squared_l2(query, v)))
            .collect();
        let by_distance = |a: &(usize, f32), b: &(usize, f32)| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0));
        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, by_distance);
            scored.truncate(k);
        }
        scored.sort_unstable_by(by_distance);
        Ok(scored)
    }
}

pub fn is_finite(v: &[f32]) -> bool {
    v.iter().all(|x| x.is_finite())
}

pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}
