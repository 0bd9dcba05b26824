use std::path::Path;

use crate::error::Result;
use crate::types::{Embedding, Segment};

/// Sentence-embedding backend. Every vector it returns has length `dim()`.
pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Embedding>>;

    fn embed_query(&self, text: &str) -> anyhow::Result<Embedding> {
        self.embed_batch(&[text.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("embedder returned no vector for query"))
    }
}

/// Extracts text segments from a document file.
pub trait DocumentLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Vec<Segment>>;
    fn supports(&self, path: &Path) -> bool;
}

/// Opaque text-generation service: prompt in, completion out.
pub trait Generator: Send + Sync {
    fn generate(&self, prompt: &str) -> anyhow::Result<String>;
}
