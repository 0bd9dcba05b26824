//! Embedding backends for docrag.
//!
//! `BertEmbedder` runs a local BERT sentence-embedding checkpoint with candle;
//! `HashEmbedder` is a deterministic stand-in that needs no model files.
//! `DOCRAG_USE_HASH_EMBEDDINGS=1` forces the hash backend regardless of config.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

use docrag_core::config::{EmbeddingBackend, EmbeddingSettings};
use docrag_core::traits::Embedder;

mod bert;
mod device;
mod hash;
mod pool;
mod tokenize;

pub use bert::BertEmbedder;
pub use device::select_device;
pub use hash::HashEmbedder;
pub use pool::masked_mean_l2;
pub use tokenize::tokenize_batch;

pub const HASH_OVERRIDE_ENV: &str = "DOCRAG_USE_HASH_EMBEDDINGS";

pub fn hash_override_enabled() -> bool {
    std::env::var(HASH_OVERRIDE_ENV)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Build the configured embedding backend. `model_dir` is the already
/// resolved model directory for the BERT backend.
pub fn get_default_embedder(settings: &EmbeddingSettings, model_dir: &Path) -> Result<Arc<dyn Embedder>> {
    if hash_override_enabled() || settings.backend == EmbeddingBackend::Hash {
        tracing::info!(dim = settings.dim, "using hash embedder");
        return Ok(Arc::new(HashEmbedder::new(settings.dim)));
    }
    Ok(Arc::new(BertEmbedder::new(model_dir, settings.max_len, settings.batch_size)?))
}
