use std::ops::Range;

use docrag_core::error::{Error, Result};
use docrag_core::types::Chunk;

/// Append-only chunk records; slot `i` pairs with vector `i` of the index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentStore {
    chunks: Vec<Chunk>,
}

impl DocumentStore {
    pub fn new() -> Self { Self::default() }

    pub fn from_chunks(chunks: Vec<Chunk>) -> Self { Self { chunks } }

    pub fn len(&self) -> usize { self.chunks.len() }
    pub fn is_empty(&self) -> bool { self.chunks.is_empty() }

    pub fn append(&mut self, chunks: Vec<Chunk>) -> Range<usize> {
        let start = self.chunks.len();
        self.chunks.extend(chunks);
        start..self.chunks.len()
    }

    pub fn get(&self, slot: usize) -> Result<&Chunk> {
        self.chunks.get(slot).ok_or(Error::IndexOutOfRange { slot, len: self.chunks.len() })
    }

    pub fn chunks(&self) -> &[Chunk] { &self.chunks }

    pub fn iter(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter()
    }
}
