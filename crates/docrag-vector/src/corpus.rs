use std::collections::BTreeSet;
use std::ops::Range;

use docrag_core::error::{Error, Result};
use docrag_core::types::{Chunk, Embedding, RetrievedChunk};

use crate::index::FlatIndex;
use crate::store::DocumentStore;

/// Vector index and chunk store kept in lockstep.
///
/// `append` is the only mutator and validates the whole batch before touching
/// either side, so `index.len() == store.len()` holds after every call.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    index: FlatIndex,
    store: DocumentStore,
    documents: BTreeSet<String>,
}

impl Corpus {
    pub fn new() -> Self { Self::default() }

    /// Assemble a corpus from separately loaded halves.
    pub fn from_parts(index: FlatIndex, store: DocumentStore) -> Result<Self> {
        if index.len() != store.len() {
            return Err(Error::Persistence(format!(
                "index holds {} vectors but store holds {} chunks",
                index.len(),
                store.len()
            )));
        }
        let documents = store.iter().map(|c| document_of(c).to_string()).collect();
        Ok(Self { index, store, documents })
    }

    pub fn len(&self) -> usize { self.store.len() }
    pub fn is_empty(&self) -> bool { self.store.is_empty() }
    pub fn dimension(&self) -> Option<usize> { self.index.dimension() }
    pub fn index(&self) -> &FlatIndex { &self.index }
    pub fn store(&self) -> &DocumentStore { &self.store }
    pub fn document_count(&self) -> usize { self.documents.len() }

    pub fn contains_document(&self, document_id: &str) -> bool {
        self.documents.contains(document_id)
    }

    /// Append one document's chunks and their vectors. Either both sides grow
    /// by `chunks.len()` or nothing changes.
    pub fn append(&mut self, document_id: &str, chunks: Vec<Chunk>, vectors: Vec<Embedding>) -> Result<Range<usize>> {
        if self.documents.contains(document_id) {
            return Err(Error::DuplicateDocument(document_id.to_string()));
        }
        if chunks.is_empty() {
            return Err(Error::EmptyDocument(document_id.to_string()));
        }
        if chunks.len() != vectors.len() {
            return Err(Error::InvalidArgument(format!(
                "{} chunks but {} vectors for document '{document_id}'",
                chunks.len(),
                vectors.len()
            )));
        }
        self.index.check_batch(&vectors)?;

        let slots = self.index.insert(vectors)?;
        let stored = self.store.append(chunks);
        debug_assert_eq!(slots, stored);
        self.documents.insert(document_id.to_string());
        Ok(slots)
    }

    /// Nearest chunks to `query`, in index order of distance.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<RetrievedChunk>> {
        self.index
            .search(query, k)?
            .into_iter()
            .map(|(slot, distance)| {
                let chunk = self.store.get(slot).map_err(|e| {
                    tracing::error!(slot, len = self.store.len(), "index slot has no chunk record");
                    e
                })?;
                Ok(RetrievedChunk { slot, distance, chunk: chunk.clone() })
            })
            .collect()
    }
}

fn document_of(chunk: &Chunk) -> &str {
    chunk
        .document_id()
        .or_else(|| chunk.id.rsplit_once('_').map(|(doc, _)| doc))
        .unwrap_or(&chunk.id)
}
