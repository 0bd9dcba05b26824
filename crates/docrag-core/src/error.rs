use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unsupported document format '{extension}' for {path}")]
    UnsupportedFormat { path: PathBuf, extension: String },

    #[error("Failed to load {path}: {reason}")]
    Load { path: PathBuf, reason: String },

    #[error("Loading {path} timed out after {secs}s")]
    LoaderTimeout { path: PathBuf, secs: u64 },

    #[error("Document '{0}' produced no chunks")]
    EmptyDocument(String),

    #[error("Document '{0}' is already ingested")]
    DuplicateDocument(String),

    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Slot {slot} out of range (store holds {len} chunks)")]
    IndexOutOfRange { slot: usize, len: usize },

    #[error("Persistence failure: {0}")]
    Persistence(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Generation failed: {0}")]
    GenerationFailed(String),
}

/// Coarse error category handed to callers that only need to branch on the
/// failure class (e.g. to pick an HTTP status).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnsupportedFormat,
    LoadFailure,
    EmptyDocument,
    DuplicateDocument,
    EmbeddingUnavailable,
    DimensionMismatch,
    IndexOutOfRange,
    PersistenceFailure,
    InvalidArgument,
    InvalidConfig,
    GenerationFailed,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnsupportedFormat { .. } => ErrorKind::UnsupportedFormat,
            Error::Load { .. } | Error::LoaderTimeout { .. } => ErrorKind::LoadFailure,
            Error::EmptyDocument(_) => ErrorKind::EmptyDocument,
            Error::DuplicateDocument(_) => ErrorKind::DuplicateDocument,
            Error::EmbeddingUnavailable(_) => ErrorKind::EmbeddingUnavailable,
            Error::DimensionMismatch { .. } => ErrorKind::DimensionMismatch,
            Error::IndexOutOfRange { .. } => ErrorKind::IndexOutOfRange,
            Error::Persistence(_) => ErrorKind::PersistenceFailure,
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Error::GenerationFailed(_) => ErrorKind::GenerationFailed,
        }
    }

    pub fn persistence(context: &str, err: impl std::fmt::Display) -> Self {
        Error::Persistence(format!("{context}: {err}"))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::persistence("io", err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::persistence("serde", err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
