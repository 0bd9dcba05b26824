//! Retrieval-augmented generation over a local document corpus.
//!
//! [`RagService`] wires a [`DocumentLoader`](docrag_core::traits::DocumentLoader),
//! the chunker, an [`Embedder`](docrag_core::traits::Embedder) and the vector
//! corpus together and keeps the corpus snapshot current on disk.

#![deny(unused_imports)]

mod prompt;
mod service;

pub use prompt::build_prompt;
pub use service::{CorpusStats, RagService};
