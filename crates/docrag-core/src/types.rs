//! Domain types shared by the loader, index and orchestrator crates.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type ChunkId = String;
pub type Meta = BTreeMap<String, String>;
pub type Embedding = Vec<f32>;

/// Metadata keys written during ingestion.
pub mod meta_keys {
    pub const SOURCE: &str = "source";
    pub const PAGE: &str = "page";
    pub const DOCUMENT_ID: &str = "document_id";
    pub const CHUNK_INDEX: &str = "chunk_index";
}

/// A retrievable span of document text.
///
/// - `id`: `"<document_id>_<sequence_index>"`, unique across the corpus
/// - `content`: non-empty chunk text
/// - `metadata`: provenance (source path, page, ...), opaque to the index
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub id: ChunkId,
    pub content: String,
    #[serde(default)]
    pub metadata: Meta,
}

impl Chunk {
    pub fn chunk_id(document_id: &str, index: usize) -> ChunkId {
        format!("{document_id}_{index}")
    }

    pub fn document_id(&self) -> Option<&str> {
        self.metadata.get(meta_keys::DOCUMENT_ID).map(String::as_str)
    }
}

/// A run of extracted text produced by a loader, e.g. one PDF page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    pub metadata: Meta,
}

impl Segment {
    pub fn new(text: impl Into<String>, metadata: Meta) -> Self {
        Self { text: text.into(), metadata }
    }
}

/// Chunk text before it receives an id, carrying its segment's metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkCandidate {
    pub content: String,
    pub metadata: Meta,
}

/// One query hit: the chunk, its slot and the squared L2 distance to the query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedChunk {
    pub slot: usize,
    pub distance: f32,
    #[serde(flatten)]
    pub chunk: Chunk,
}

/// Outcome of one successful ingestion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestReport {
    pub document_id: String,
    pub chunk_ids: Vec<ChunkId>,
    /// Corpus size after the append.
    pub total_chunks: usize,
}

/// Grounded answer returned by the answer pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<ChunkId>,
}
