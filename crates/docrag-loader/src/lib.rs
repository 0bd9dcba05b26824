//! Text extraction for ingestible files.
//!
//! `FileLoader` dispatches on the file extension: PDF pages, Word `.docx`
//! bodies and plain text / Markdown. Each yields [`Segment`]s carrying a
//! `source` metadata entry (and `page` for PDFs).

#![deny(unused_imports)]

use std::fs;
use std::path::{Path, PathBuf};

use docrag_core::error::{Error, Result};
use docrag_core::traits::DocumentLoader;
use docrag_core::types::{meta_keys, Meta, Segment};

mod docx;
mod pdf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Text,
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "txt" | "md" | "markdown" => Some(Self::Text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FileLoader;

impl FileLoader {
    pub fn new() -> Self { Self }
}

impl DocumentLoader for FileLoader {
    fn load(&self, path: &Path) -> Result<Vec<Segment>> {
        let format = DocumentFormat::from_path(path).ok_or_else(|| Error::UnsupportedFormat {
            path: path.to_path_buf(),
            extension: path
                .extension()
                .map(|e| e.to_string_lossy().to_string())
                .unwrap_or_default(),
        })?;
        if !path.is_file() {
            return Err(load_error(path, "file not found"));
        }

        let source = source_meta(path);
        let segments = match format {
            DocumentFormat::Pdf => pdf::extract_pages(path)?
                .into_iter()
                .enumerate()
                .map(|(page, text)| {
                    let mut metadata = source.clone();
                    metadata.insert(meta_keys::PAGE.to_string(), page.to_string());
                    Segment::new(text, metadata)
                })
                .collect(),
            DocumentFormat::Docx => vec![Segment::new(docx::extract_text(path)?, source)],
            DocumentFormat::Text => vec![Segment::new(read_text(path)?, source)],
        };
        tracing::debug!(path = %path.display(), ?format, segments = segments.len(), "loaded document");
        Ok(segments)
    }

    fn supports(&self, path: &Path) -> bool {
        DocumentFormat::from_path(path).is_some()
    }
}

/// Loadable files under `root`, sorted. A file path is returned as-is when
/// its format is supported.
pub fn discover(root: &Path) -> Vec<PathBuf> {
    if root.is_file() {
        return if DocumentFormat::from_path(root).is_some() { vec![root.to_path_buf()] } else { vec![] };
    }
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| DocumentFormat::from_path(p).is_some())
        .collect();
    files.sort();
    files
}

fn read_text(path: &Path) -> Result<String> {
    let bytes = fs::read(path).map_err(|e| load_error(path, e))?;
    Ok(match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    })
}

fn source_meta(path: &Path) -> Meta {
    let mut meta = Meta::new();
    meta.insert(meta_keys::SOURCE.to_string(), path.display().to_string());
    meta
}

pub(crate) fn load_error(path: &Path, reason: impl std::fmt::Display) -> Error {
    Error::Load { path: path.to_path_buf(), reason: reason.to_string() }
}
