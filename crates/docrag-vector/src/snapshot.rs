//! Corpus snapshots on disk.
//!
//! Layout inside the storage directory:
//!
//! ```text
//! manifest.json          {"generation": 7, "chunks": 412, "dimension": 384, ...}
//! index-7.json           {"dimension": 384, "vectors": [[...], ...]}
//! documents-7.json       [{"id": "...", "content": "...", "metadata": {...}}, ...]
//! ```
//!
//! Artifacts for a new generation are written and synced first; replacing
//! `manifest.json` is the commit. A crash before that leaves the previous
//! generation live.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use docrag_core::error::{Error, Result};
use docrag_core::types::{Chunk, Embedding};

use crate::corpus::Corpus;
use crate::index::FlatIndex;
use crate::store::DocumentStore;

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub generation: u64,
    pub chunks: usize,
    pub dimension: Option<usize>,
    pub index_file: String,
    pub documents_file: String,
}

#[derive(Serialize)]
struct IndexFileRef<'a> {
    dimension: Option<usize>,
    vectors: &'a [Embedding],
}

#[derive(Deserialize)]
struct IndexFile {
    dimension: Option<usize>,
    vectors: Vec<Embedding>,
}

/// A corpus serialized in memory, ready to be written without holding any
/// lock on the corpus itself.
#[derive(Debug, Clone)]
pub struct EncodedSnapshot {
    pub manifest: Manifest,
    index: Vec<u8>,
    documents: Vec<u8>,
}

/// Writer for one storage directory. Tracks the live generation.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
    generation: u64,
}

impl SnapshotStore {
    /// Open `dir` and load whatever snapshot it holds. A missing directory or
    /// manifest yields an empty corpus.
    pub fn open(dir: impl Into<PathBuf>) -> Result<(Self, Corpus)> {
        let dir = dir.into();
        let (generation, corpus) = match read_manifest(&dir)? {
            Some(manifest) => {
                let corpus = load_generation(&dir, &manifest)?;
                tracing::info!(
                    dir = %dir.display(),
                    generation = manifest.generation,
                    chunks = corpus.len(),
                    "loaded snapshot"
                );
                (manifest.generation, corpus)
            }
            None => {
                tracing::info!(dir = %dir.display(), "no snapshot found, starting empty");
                (0, Corpus::new())
            }
        };
        Ok((Self { dir, generation }, corpus))
    }

    pub fn dir(&self) -> &Path { &self.dir }
    pub fn generation(&self) -> u64 { self.generation }

    /// Serialize `corpus` as the next generation.
    pub fn encode(&self, corpus: &Corpus) -> Result<EncodedSnapshot> {
        let generation = self.generation + 1;
        let index = serde_json::to_vec(&IndexFileRef {
            dimension: corpus.dimension(),
            vectors: corpus.index().vectors(),
        })?;
        let documents = serde_json::to_vec(corpus.store().chunks())?;
        Ok(EncodedSnapshot {
            manifest: Manifest {
                generation,
                chunks: corpus.len(),
                dimension: corpus.dimension(),
                index_file: format!("index-{generation}.json"),
                documents_file: format!("documents-{generation}.json"),
            },
            index,
            documents,
        })
    }

    /// Write artifacts, commit the manifest, then drop superseded files.
    pub fn write(&mut self, snapshot: EncodedSnapshot) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| Error::persistence(&format!("creating {}", self.dir.display()), e))?;

        write_atomic(&self.dir, &snapshot.manifest.index_file, &snapshot.index)?;
        write_atomic(&self.dir, &snapshot.manifest.documents_file, &snapshot.documents)?;
        let manifest = serde_json::to_vec_pretty(&snapshot.manifest)?;
        write_atomic(&self.dir, MANIFEST_FILE, &manifest)?;
        sync_dir(&self.dir);

        self.generation = snapshot.manifest.generation;
        tracing::info!(
            dir = %self.dir.display(),
            generation = self.generation,
            chunks = snapshot.manifest.chunks,
            "snapshot committed"
        );
        self.remove_stale(&snapshot.manifest);
        Ok(())
    }

    pub fn save(&mut self, corpus: &Corpus) -> Result<()> {
        let snapshot = self.encode(corpus)?;
        self.write(snapshot)
    }

    fn remove_stale(&self, live: &Manifest) {
        let Ok(entries) = fs::read_dir(&self.dir) else { return };
        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name().to_string_lossy().to_string();
            let is_artifact = (name.starts_with("index-") || name.starts_with("documents-")) && name.ends_with(".json");
            if is_artifact && name != live.index_file && name != live.documents_file {
                if let Err(e) = fs::remove_file(entry.path()) {
                    tracing::warn!(file = %name, error = %e, "could not remove stale snapshot file");
                }
            }
        }
    }
}

fn read_manifest(dir: &Path) -> Result<Option<Manifest>> {
    let path = dir.join(MANIFEST_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(&path).map_err(|e| Error::persistence(&format!("reading {}", path.display()), e))?;
    let manifest = serde_json::from_slice(&bytes).map_err(|e| Error::persistence(MANIFEST_FILE, e))?;
    Ok(Some(manifest))
}

fn load_generation(dir: &Path, manifest: &Manifest) -> Result<Corpus> {
    let index_path = dir.join(&manifest.index_file);
    let index_file: IndexFile = serde_json::from_slice(
        &fs::read(&index_path).map_err(|e| Error::persistence(&format!("reading {}", index_path.display()), e))?,
    )
    .map_err(|e| Error::persistence(&manifest.index_file, e))?;

    let documents_path = dir.join(&manifest.documents_file);
    let chunks: Vec<Chunk> = serde_json::from_slice(
        &fs::read(&documents_path)
            .map_err(|e| Error::persistence(&format!("reading {}", documents_path.display()), e))?,
    )
    .map_err(|e| Error::persistence(&manifest.documents_file, e))?;

    if index_file.dimension != manifest.dimension {
        return Err(Error::Persistence(format!(
            "{} has dimension {:?}, manifest says {:?}",
            manifest.index_file, index_file.dimension, manifest.dimension
        )));
    }
    if index_file.vectors.len() != manifest.chunks || chunks.len() != manifest.chunks {
        return Err(Error::Persistence(format!(
            "generation {} expects {} chunks, found {} vectors and {} records",
            manifest.generation,
            manifest.chunks,
            index_file.vectors.len(),
            chunks.len()
        )));
    }

    let index = FlatIndex::from_vectors(index_file.dimension, index_file.vectors)
        .map_err(|e| Error::persistence(&manifest.index_file, e))?;
    Corpus::from_parts(index, DocumentStore::from_chunks(chunks))
}

fn write_atomic(dir: &Path, name: &str, bytes: &[u8]) -> Result<()> {
    let target = dir.join(name);
    let context = format!("writing {}", target.display());
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| Error::persistence(&context, e))?;
    tmp.write_all(bytes).map_err(|e| Error::persistence(&context, e))?;
    tmp.as_file().sync_all().map_err(|e| Error::persistence(&context, e))?;
    tmp.persist(&target).map_err(|e| Error::persistence(&context, e.error))?;
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(e) = fs::File::open(dir).and_then(|d| d.sync_all()) {
        tracing::debug!(dir = %dir.display(), error = %e, "directory fsync failed");
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}
