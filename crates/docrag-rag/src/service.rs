use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, RwLock, RwLockReadGuard};
use tokio::task;
use tokio::time::timeout;
use tracing::instrument;

use docrag_core::chunker::TextSplitter;
use docrag_core::config::Settings;
use docrag_core::error::{Error, Result};
use docrag_core::traits::{DocumentLoader, Embedder, Generator};
use docrag_core::types::{meta_keys, Answer, Chunk, Embedding, IngestReport, RetrievedChunk, Segment};
use docrag_vector::{is_finite, Corpus, SnapshotStore};

use crate::prompt::build_prompt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusStats {
    pub chunks: usize,
    pub documents: usize,
    pub dimension: Option<usize>,
    pub storage_dir: PathBuf,
}

/// Ingestion and retrieval over one storage directory.
///
/// Queries share a read lock on the corpus. Ingestions are serialized by the
/// snapshot writer lock and hold the corpus write lock only for the in-memory
/// append, so a reader sees a document either fully or not at all.
pub struct RagService {
    settings: Settings,
    storage_dir: PathBuf,
    splitter: TextSplitter,
    embedder: Arc<dyn Embedder>,
    loader: Arc<dyn DocumentLoader>,
    corpus: RwLock<Corpus>,
    snapshots: Mutex<SnapshotStore>,
}

impl RagService {
    /// Validate settings and load the persisted corpus, if any. Fails when the
    /// stored vectors do not match the embedder's dimension.
    pub async fn open(
        settings: Settings,
        base: &Path,
        embedder: Arc<dyn Embedder>,
        loader: Arc<dyn DocumentLoader>,
    ) -> Result<Self> {
        settings.validate()?;
        let splitter = TextSplitter::from_settings(&settings.chunking)?;
        let storage_dir = settings.storage_dir(base);

        let dir = storage_dir.clone();
        let (snapshots, corpus) = task::spawn_blocking(move || SnapshotStore::open(dir))
            .await
            .map_err(|e| Error::persistence("loading snapshot", e))??;

        if let Some(stored) = corpus.dimension() {
            if stored != embedder.dim() {
                return Err(Error::DimensionMismatch { expected: stored, got: embedder.dim() });
            }
        }
        tracing::info!(
            storage_dir = %storage_dir.display(),
            chunks = corpus.len(),
            documents = corpus.document_count(),
            "rag service ready"
        );

        Ok(Self {
            settings,
            storage_dir,
            splitter,
            embedder,
            loader,
            corpus: RwLock::new(corpus),
            snapshots: Mutex::new(snapshots),
        })
    }

    pub fn settings(&self) -> &Settings { &self.settings }
    pub fn default_k(&self) -> usize { self.settings.retrieval.default_k }

    pub async fn len(&self) -> usize { self.corpus.read().await.len() }
    pub async fn is_empty(&self) -> bool { self.corpus.read().await.is_empty() }

    pub async fn stats(&self) -> CorpusStats {
        let corpus = self.corpus.read().await;
        CorpusStats {
            chunks: corpus.len(),
            documents: corpus.document_count(),
            dimension: corpus.dimension(),
            storage_dir: self.storage_dir.clone(),
        }
    }

    /// Load, chunk, embed and append one document, then persist the corpus.
    ///
    /// Any failure before the append leaves the corpus untouched. A failed
    /// save is returned as `Persistence` but the appended chunks stay
    /// searchable; the previous snapshot remains on disk.
    #[instrument(skip(self, path), fields(path = %path.display()))]
    pub async fn ingest(&self, path: &Path, document_id: &str) -> Result<IngestReport> {
        if document_id.trim().is_empty() {
            return Err(Error::InvalidArgument("document id must not be empty".into()));
        }
        let start = Instant::now();
        let mut writer = self.snapshots.lock().await;
        if self.corpus.read().await.contains_document(document_id) {
            return Err(Error::DuplicateDocument(document_id.to_string()));
        }

        let segments = self.load(path).await?;
        let chunks = self.chunk(document_id, &segments);
        if chunks.is_empty() {
            tracing::warn!(document_id, "document produced no chunks");
            return Err(Error::EmptyDocument(document_id.to_string()));
        }
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self.embed(texts).await?;

        let chunk_ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
        let mut corpus = self.corpus.write().await;
        let slots = corpus.append(document_id, chunks, vectors)?;
        let total_chunks = corpus.len();
        tracing::info!(
            document_id,
            chunks = slots.len(),
            total_chunks,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "document appended"
        );

        self.persist(&mut writer, corpus.downgrade()).await?;
        Ok(IngestReport { document_id: document_id.to_string(), chunk_ids, total_chunks })
    }

    /// Nearest chunks to `text`. An empty corpus answers with no hits without
    /// calling the embedder.
    #[instrument(skip(self, text), fields(query_len = text.len()))]
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<RetrievedChunk>> {
        if k == 0 {
            return Err(Error::InvalidArgument("k must be at least 1".into()));
        }
        if self.corpus.read().await.is_empty() {
            return Ok(Vec::new());
        }
        let query = self.embed_query(text).await?;
        let hits = self.search_vector(&query, k).await?;
        tracing::debug!(k, hits = hits.len(), "query served");
        Ok(hits)
    }

    pub async fn search_vector(&self, query: &[f32], k: usize) -> Result<Vec<RetrievedChunk>> {
        self.corpus.read().await.search(query, k)
    }

    /// Retrieve context for `question` and render the grounded prompt.
    pub async fn prepare_prompt(&self, question: &str, k: usize) -> Result<(String, Vec<RetrievedChunk>)> {
        let hits = self.query(question, k).await?;
        let prompt = build_prompt(&self.settings.prompt.preamble, question, &hits);
        Ok((prompt, hits))
    }

    /// Full answer pipeline: retrieve, build the prompt, call `generator`.
    pub async fn answer(&self, question: &str, k: usize, generator: Arc<dyn Generator>) -> Result<Answer> {
        let (prompt, hits) = self.prepare_prompt(question, k).await?;
        let text = task::spawn_blocking(move || generator.generate(&prompt))
            .await
            .map_err(|e| Error::GenerationFailed(e.to_string()))?
            .map_err(|e| Error::GenerationFailed(format!("{e:#}")))?;
        Ok(Answer { text, sources: hits.into_iter().map(|h| h.chunk.id).collect() })
    }

    async fn load(&self, path: &Path) -> Result<Vec<Segment>> {
        let loader = Arc::clone(&self.loader);
        let owned = path.to_path_buf();
        let limit = self.settings.loader_timeout();
        match timeout(limit, task::spawn_blocking(move || loader.load(&owned))).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(Error::Load { path: path.to_path_buf(), reason: join.to_string() }),
            Err(_) => {
                tracing::warn!(secs = limit.as_secs(), "loader timed out");
                Err(Error::LoaderTimeout { path: path.to_path_buf(), secs: limit.as_secs() })
            }
        }
    }

    fn chunk(&self, document_id: &str, segments: &[Segment]) -> Vec<Chunk> {
        self.splitter
            .split_segments(segments)
            .into_iter()
            .enumerate()
            .map(|(i, candidate)| {
                let mut metadata = candidate.metadata;
                metadata.insert(meta_keys::DOCUMENT_ID.to_string(), document_id.to_string());
                metadata.insert(meta_keys::CHUNK_INDEX.to_string(), i.to_string());
                Chunk { id: Chunk::chunk_id(document_id, i), content: candidate.content, metadata }
            })
            .collect()
    }

    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Embedding>> {
        let expected = texts.len();
        let vectors = self.run_embedder(move |embedder| embedder.embed_batch(&texts)).await?;
        if vectors.len() != expected {
            return Err(Error::EmbeddingUnavailable(format!(
                "embedder returned {} vectors for {expected} texts",
                vectors.len()
            )));
        }
        check_finite(&vectors)?;
        Ok(vectors)
    }

    async fn embed_query(&self, text: &str) -> Result<Embedding> {
        let text = text.to_string();
        let vector = self.run_embedder(move |embedder| embedder.embed_query(&text)).await?;
        check_finite(std::slice::from_ref(&vector))?;
        Ok(vector)
    }

    /// Run one embedder call off the async runtime, bounded by `embed_timeout`.
    async fn run_embedder<T, F>(&self, call: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Embedder) -> anyhow::Result<T> + Send + 'static,
    {
        let embedder = Arc::clone(&self.embedder);
        let limit = self.settings.embed_timeout();
        let start = Instant::now();
        let output = match timeout(limit, task::spawn_blocking(move || call(embedder.as_ref()))).await {
            Ok(Ok(Ok(output))) => output,
            Ok(Ok(Err(e))) => return Err(Error::EmbeddingUnavailable(format!("{e:#}"))),
            Ok(Err(join)) => return Err(Error::EmbeddingUnavailable(join.to_string())),
            Err(_) => {
                return Err(Error::EmbeddingUnavailable(format!("timed out after {}s", limit.as_secs())));
            }
        };
        tracing::debug!(elapsed_ms = start.elapsed().as_millis() as u64, "embedded");
        Ok(output)
    }

    async fn persist(&self, writer: &mut SnapshotStore, corpus: RwLockReadGuard<'_, Corpus>) -> Result<()> {
        let encoded = writer.encode(&corpus);
        drop(corpus);

        let mut next = writer.clone();
        let written = match encoded {
            Ok(encoded) => task::spawn_blocking(move || next.write(encoded).map(|()| next))
                .await
                .map_err(|e| Error::persistence("snapshot task", e))
                .and_then(|r| r),
            Err(e) => Err(e),
        };
        match written {
            Ok(committed) => {
                *writer = committed;
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, dir = %self.storage_dir.display(), "snapshot save failed");
                Err(e)
            }
        }
    }
}

/// Non-finite vectors would poison the index and cannot be written to a snapshot.
fn check_finite(vectors: &[Embedding]) -> Result<()> {
    match vectors.iter().position(|v| !is_finite(v)) {
        Some(row) => Err(Error::EmbeddingUnavailable(format!("embedder returned a non-finite value in vector {row}"))),
        None => Ok(()),
    }
}
