use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use docrag_core::config::Settings;
use docrag_core::traits::{DocumentLoader, Embedder, Generator};
use docrag_core::types::{meta_keys, Embedding, Meta, Segment};
use docrag_core::{Error, ErrorKind, Result};
use docrag_embed::HashEmbedder;
use docrag_loader::FileLoader;
use docrag_rag::RagService;
use docrag_vector::SnapshotStore;
use tempfile::TempDir;

/// Serves fixed pages per path; a page shorter than the chunk size becomes
/// exactly one chunk.
#[derive(Default)]
struct StaticLoader {
    docs: HashMap<PathBuf, Vec<String>>,
    delay: Option<Duration>,
}

impl StaticLoader {
    fn with(mut self, path: &str, pages: &[&str]) -> Self {
        self.docs.insert(PathBuf::from(path), pages.iter().map(|p| p.to_string()).collect());
        self
    }
}

impl DocumentLoader for StaticLoader {
    fn load(&self, path: &Path) -> Result<Vec<Segment>> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        let pages = self.docs.get(path).ok_or_else(|| Error::Load { path: path.into(), reason: "unknown".into() })?;
        Ok(pages
            .iter()
            .enumerate()
            .map(|(i, text)| {
                let mut meta = Meta::new();
                meta.insert(meta_keys::SOURCE.into(), path.display().to_string());
                meta.insert(meta_keys::PAGE.into(), i.to_string());
                Segment::new(text.clone(), meta)
            })
            .collect())
    }

    fn supports(&self, path: &Path) -> bool {
        self.docs.contains_key(path)
    }
}

/// Looks vectors up by exact text; unknown text maps to the origin.
struct ScriptedEmbedder {
    table: HashMap<String, Embedding>,
    dim: usize,
    fail: AtomicBool,
    calls: AtomicUsize,
    queries: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedEmbedder {
    fn new(dim: usize, rows: &[(&str, &[f32])]) -> Self {
        Self {
            table: rows.iter().map(|(t, v)| (t.to_string(), v.to_vec())).collect(),
            dim,
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            queries: AtomicUsize::new(0),
            delay: None,
        }
    }
}

impl Embedder for ScriptedEmbedder {
    fn dim(&self) -> usize { self.dim }

    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Embedding>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.fail.load(Ordering::SeqCst) {
            bail!("model backend offline");
        }
        Ok(texts
            .iter()
            .map(|t| self.table.get(t).cloned().unwrap_or_else(|| vec![0.0; self.dim]))
            .collect())
    }

    fn embed_query(&self, text: &str) -> anyhow::Result<Embedding> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.table.get(text).cloned().unwrap_or_else(|| vec![0.0; self.dim]))
    }
}

struct EchoGenerator;

impl Generator for EchoGenerator {
    fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        Ok(format!("answered from {} chars", prompt.len()))
    }
}

struct DownGenerator;

impl Generator for DownGenerator {
    fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
        bail!("connection refused")
    }
}

const DOC_A: [&str; 3] = ["Admissions open in May.", "Hostel fees are due in July.", "Exams begin in December."];
const DOC_B: [&str; 2] = ["The library opens at 8am.", "The canteen closes at 9pm."];

fn scripted() -> ScriptedEmbedder {
    ScriptedEmbedder::new(
        3,
        &[
            (DOC_A[0], &[1.0, 0.0, 0.0]),
            (DOC_A[1], &[0.0, 1.0, 0.0]),
            (DOC_A[2], &[0.0, 0.0, 1.0]),
            (DOC_B[0], &[1.0, 1.0, 0.0]),
            (DOC_B[1], &[0.0, 1.0, 1.0]),
            ("When are hostel fees due?", &[0.1, 0.9, 0.0]),
        ],
    )
}

fn loader() -> StaticLoader {
    StaticLoader::default()
        .with("docA.pdf", &DOC_A)
        .with("docB.pdf", &DOC_B)
        .with("blank.pdf", &["   ", "\n\n"])
}

fn settings() -> Settings {
    let mut s = Settings::default();
    s.storage.dir = "store".into();
    s
}

async fn open(tmp: &TempDir, embedder: Arc<dyn Embedder>, loader: StaticLoader) -> RagService {
    RagService::open(settings(), tmp.path(), embedder, Arc::new(loader)).await.unwrap()
}

fn ids(hits: &[docrag_core::types::RetrievedChunk]) -> Vec<&str> {
    hits.iter().map(|h| h.chunk.id.as_str()).collect()
}

#[tokio::test]
async fn ingest_then_query_two_documents() {
    let tmp = TempDir::new().unwrap();
    let service = open(&tmp, Arc::new(scripted()), loader()).await;

    let report = service.ingest(Path::new("docA.pdf"), "docA").await.unwrap();
    assert_eq!(report.chunk_ids, vec!["docA_0", "docA_1", "docA_2"]);
    assert_eq!(report.total_chunks, 3);
    assert_eq!(service.len().await, 3);

    let hits = service.search_vector(&[0.05, 0.95, 0.0], 1).await.unwrap();
    assert_eq!(ids(&hits), vec!["docA_1"]);
    assert_eq!(hits[0].chunk.content, DOC_A[1]);

    service.ingest(Path::new("docB.pdf"), "docB").await.unwrap();
    assert_eq!(service.len().await, 5);

    let all = service.search_vector(&[0.0, 0.0, 0.0], 10).await.unwrap();
    assert_eq!(all.len(), 5);
    let mut slot_order: Vec<_> = all.iter().map(|h| (h.slot, h.chunk.id.clone())).collect();
    slot_order.sort();
    let by_slot: Vec<_> = slot_order.into_iter().map(|(_, id)| id).collect();
    assert_eq!(by_slot, vec!["docA_0", "docA_1", "docA_2", "docB_0", "docB_1"]);

    let hits = service.query("When are hostel fees due?", 2).await.unwrap();
    assert_eq!(ids(&hits), vec!["docA_1", "docB_0"]);
    assert!(hits[0].distance <= hits[1].distance);
}

#[tokio::test]
async fn chunk_metadata_carries_provenance() {
    let tmp = TempDir::new().unwrap();
    let service = open(&tmp, Arc::new(scripted()), loader()).await;
    service.ingest(Path::new("docA.pdf"), "docA").await.unwrap();

    let hit = &service.search_vector(&[0.0, 0.0, 1.0], 1).await.unwrap()[0];
    let meta = &hit.chunk.metadata;
    assert_eq!(meta.get(meta_keys::SOURCE).map(String::as_str), Some("docA.pdf"));
    assert_eq!(meta.get(meta_keys::PAGE).map(String::as_str), Some("2"));
    assert_eq!(meta.get(meta_keys::DOCUMENT_ID).map(String::as_str), Some("docA"));
    assert_eq!(meta.get(meta_keys::CHUNK_INDEX).map(String::as_str), Some("2"));
}

#[tokio::test]
async fn query_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let service = open(&tmp, Arc::new(scripted()), loader()).await;
    service.ingest(Path::new("docA.pdf"), "docA").await.unwrap();

    let first = service.query("When are hostel fees due?", 3).await.unwrap();
    let second = service.query("When are hostel fees due?", 3).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn empty_corpus_answers_without_embedding() {
    let tmp = TempDir::new().unwrap();
    let embedder = Arc::new(scripted());
    let service = open(&tmp, embedder.clone(), loader()).await;

    assert!(service.is_empty().await);
    assert!(service.query("anything", 3).await.unwrap().is_empty());
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn zero_k_is_invalid() {
    let tmp = TempDir::new().unwrap();
    let service = open(&tmp, Arc::new(scripted()), loader()).await;
    let err = service.query("anything", 0).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[tokio::test]
async fn blank_document_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let service = open(&tmp, Arc::new(scripted()), loader()).await;

    let err = service.ingest(Path::new("blank.pdf"), "blank").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EmptyDocument);
    assert!(service.is_empty().await);
    assert!(!tmp.path().join("store").join("manifest.json").exists());
}

#[tokio::test]
async fn embedder_failure_leaves_corpus_and_snapshot_unchanged() {
    let tmp = TempDir::new().unwrap();
    let embedder = Arc::new(scripted());
    let service = open(&tmp, embedder.clone(), loader()).await;
    service.ingest(Path::new("docA.pdf"), "docA").await.unwrap();

    embedder.fail.store(true, Ordering::SeqCst);
    let err = service.ingest(Path::new("docB.pdf"), "docB").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EmbeddingUnavailable);
    assert!(err.to_string().contains("model backend offline"));
    assert_eq!(service.len().await, 3);

    let (snapshots, on_disk) = SnapshotStore::open(tmp.path().join("store")).unwrap();
    assert_eq!(snapshots.generation(), 1);
    assert_eq!(on_disk.len(), 3);

    embedder.fail.store(false, Ordering::SeqCst);
    service.ingest(Path::new("docB.pdf"), "docB").await.unwrap();
    assert_eq!(service.len().await, 5);
}

#[tokio::test]
async fn dimension_change_is_rejected_whole() {
    let tmp = TempDir::new().unwrap();
    let mut embedder = scripted();
    embedder.table.insert(DOC_B[1].to_string(), vec![1.0, 2.0]);
    let service = open(&tmp, Arc::new(embedder), loader()).await;
    service.ingest(Path::new("docA.pdf"), "docA").await.unwrap();

    let err = service.ingest(Path::new("docB.pdf"), "docB").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DimensionMismatch);
    assert_eq!(service.len().await, 3);
    assert_eq!(service.stats().await.documents, 1);
}

#[tokio::test]
async fn non_finite_embeddings_leave_corpus_and_snapshot_unchanged() {
    let tmp = TempDir::new().unwrap();
    let mut embedder = scripted();
    embedder.table.insert(DOC_B[1].to_string(), vec![0.0, f32::NAN, 1.0]);
    let service = open(&tmp, Arc::new(embedder), loader()).await;
    service.ingest(Path::new("docA.pdf"), "docA").await.unwrap();

    let err = service.ingest(Path::new("docB.pdf"), "docB").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EmbeddingUnavailable);
    assert_eq!(service.len().await, 3);
    assert_eq!(service.stats().await.documents, 1);

    let (snapshots, on_disk) = SnapshotStore::open(tmp.path().join("store")).unwrap();
    assert_eq!(snapshots.generation(), 1);
    assert_eq!(on_disk.len(), 3);
}

#[tokio::test]
async fn non_finite_query_vector_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let mut embedder = scripted();
    embedder.table.insert("overflow".to_string(), vec![f32::INFINITY, 0.0, 0.0]);
    let service = open(&tmp, Arc::new(embedder), loader()).await;
    service.ingest(Path::new("docA.pdf"), "docA").await.unwrap();

    let err = service.query("overflow", 1).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EmbeddingUnavailable);
}

#[tokio::test]
async fn queries_use_the_single_text_path() {
    let tmp = TempDir::new().unwrap();
    let embedder = Arc::new(scripted());
    let service = open(&tmp, embedder.clone(), loader()).await;
    service.ingest(Path::new("docA.pdf"), "docA").await.unwrap();
    let batches = embedder.calls.load(Ordering::SeqCst);

    service.query("When are hostel fees due?", 1).await.unwrap();
    assert_eq!(embedder.queries.load(Ordering::SeqCst), 1);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), batches);
}

#[tokio::test]
async fn duplicate_document_id_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let embedder = Arc::new(scripted());
    let service = open(&tmp, embedder.clone(), loader()).await;
    service.ingest(Path::new("docA.pdf"), "docA").await.unwrap();
    let calls = embedder.calls.load(Ordering::SeqCst);

    let err = service.ingest(Path::new("docB.pdf"), "docA").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateDocument);
    assert_eq!(service.len().await, 3);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), calls, "duplicate must be caught before embedding");
}

#[tokio::test]
async fn unknown_file_is_a_load_failure() {
    let tmp = TempDir::new().unwrap();
    let service = open(&tmp, Arc::new(scripted()), loader()).await;
    let err = service.ingest(Path::new("missing.pdf"), "missing").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LoadFailure);
}

#[tokio::test]
async fn slow_loader_times_out() {
    let tmp = TempDir::new().unwrap();
    let mut settings = settings();
    settings.timeouts.loader_secs = 1;
    let mut slow = loader();
    slow.delay = Some(Duration::from_millis(1500));
    let service = RagService::open(settings, tmp.path(), Arc::new(scripted()), Arc::new(slow)).await.unwrap();

    let err = service.ingest(Path::new("docA.pdf"), "docA").await.unwrap_err();
    assert!(matches!(err, Error::LoaderTimeout { secs: 1, .. }));
    assert!(service.is_empty().await);
}

#[tokio::test]
async fn restart_restores_corpus() {
    let tmp = TempDir::new().unwrap();
    let before = {
        let service = open(&tmp, Arc::new(scripted()), loader()).await;
        service.ingest(Path::new("docA.pdf"), "docA").await.unwrap();
        service.ingest(Path::new("docB.pdf"), "docB").await.unwrap();
        service.query("When are hostel fees due?", 5).await.unwrap()
    };

    let service = open(&tmp, Arc::new(scripted()), loader()).await;
    assert_eq!(service.len().await, 5);
    let after = service.query("When are hostel fees due?", 5).await.unwrap();
    assert_eq!(before, after);

    let err = service.ingest(Path::new("docA.pdf"), "docA").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateDocument);
}

#[tokio::test]
async fn reopening_with_another_dimension_fails() {
    let tmp = TempDir::new().unwrap();
    {
        let service = open(&tmp, Arc::new(scripted()), loader()).await;
        service.ingest(Path::new("docA.pdf"), "docA").await.unwrap();
    }
    let err = RagService::open(settings(), tmp.path(), Arc::new(HashEmbedder::new(8)), Arc::new(loader()))
        .await
        .err()
        .expect("dimension mismatch");
    assert!(matches!(err, Error::DimensionMismatch { expected: 3, got: 8 }));
}

#[tokio::test]
async fn failed_save_keeps_appended_chunks() {
    let tmp = TempDir::new().unwrap();
    // A regular file where the storage directory should be.
    fs::write(tmp.path().join("store"), b"not a directory").unwrap();
    let service = open(&tmp, Arc::new(scripted()), loader()).await;

    let err = service.ingest(Path::new("docA.pdf"), "docA").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PersistenceFailure);
    assert_eq!(service.len().await, 3);
    assert_eq!(ids(&service.search_vector(&[1.0, 0.0, 0.0], 1).await.unwrap()), vec!["docA_0"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_never_see_a_partial_document() {
    let tmp = TempDir::new().unwrap();
    let mut embedder = scripted();
    embedder.delay = Some(Duration::from_millis(20));
    let service = Arc::new(open(&tmp, Arc::new(embedder), loader()).await);
    service.ingest(Path::new("docA.pdf"), "docA").await.unwrap();

    let mut readers = Vec::new();
    for _ in 0..4 {
        let service = Arc::clone(&service);
        readers.push(tokio::spawn(async move {
            let mut seen = Vec::new();
            for _ in 0..50 {
                let hits = service.search_vector(&[0.0, 0.0, 0.0], 100).await.unwrap();
                seen.push(hits.len());
                tokio::task::yield_now().await;
            }
            seen
        }));
    }
    service.ingest(Path::new("docB.pdf"), "docB").await.unwrap();

    for reader in readers {
        for n in reader.await.unwrap() {
            assert!(n == 3 || n == 5, "observed {n} chunks");
        }
    }
    assert_eq!(service.len().await, 5);
}

#[tokio::test]
async fn answer_cites_retrieved_chunks() {
    let tmp = TempDir::new().unwrap();
    let service = open(&tmp, Arc::new(scripted()), loader()).await;
    service.ingest(Path::new("docA.pdf"), "docA").await.unwrap();

    let (prompt, hits) = service.prepare_prompt("When are hostel fees due?", 1).await.unwrap();
    assert_eq!(ids(&hits), vec!["docA_1"]);
    assert!(prompt.contains("Context: Hostel fees are due in July.\n\nQuestion: When are hostel fees due?\n\nAnswer:"));
    assert!(prompt.starts_with(&service.settings().prompt.preamble));

    let answer = service.answer("When are hostel fees due?", 1, Arc::new(EchoGenerator)).await.unwrap();
    assert_eq!(answer.sources, vec!["docA_1"]);
    assert_eq!(answer.text, format!("answered from {} chars", prompt.len()));

    let err = service.answer("When are hostel fees due?", 1, Arc::new(DownGenerator)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::GenerationFailed);
}

#[tokio::test]
async fn text_files_end_to_end_with_hash_embeddings() {
    let tmp = TempDir::new().unwrap();
    let docs = tmp.path().join("docs");
    fs::create_dir_all(&docs).unwrap();
    let handbook = docs.join("handbook.txt");
    fs::write(
        &handbook,
        "Library hours\n\nThe central library is open from 8am to 10pm on weekdays.\n\n\
         Transport\n\nCampus buses leave the main gate every thirty minutes.",
    )
    .unwrap();

    let mut settings = settings();
    settings.chunking.chunk_size = 80;
    settings.chunking.chunk_overlap = 10;
    let service = RagService::open(settings, tmp.path(), Arc::new(HashEmbedder::new(256)), Arc::new(FileLoader::new()))
        .await
        .unwrap();

    let report = service.ingest(&handbook, "handbook").await.unwrap();
    assert!(report.chunk_ids.len() >= 2);

    let hits = service.query("campus buses main gate", 1).await.unwrap();
    assert!(hits[0].chunk.content.contains("buses"), "got {:?}", hits[0].chunk.content);

    let stats = service.stats().await;
    assert_eq!(stats.documents, 1);
    assert_eq!(stats.dimension, Some(256));
    assert_eq!(stats.storage_dir, tmp.path().join("store"));
}
