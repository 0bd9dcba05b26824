use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

pub const ENV_PREFIX: &str = "DOCRAG_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub storage: StorageSettings,
    pub chunking: ChunkingSettings,
    pub embedding: EmbeddingSettings,
    pub retrieval: RetrievalSettings,
    pub timeouts: TimeoutSettings,
    pub prompt: PromptSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSettings {
    pub dir: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    Bert,
    Hash,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    pub backend: EmbeddingBackend,
    pub model_dir: String,
    /// Output dimension of the hash backend; the BERT backend reads its own.
    pub dim: usize,
    pub max_len: usize,
    pub batch_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalSettings {
    pub default_k: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutSettings {
    pub loader_secs: u64,
    pub embed_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptSettings {
    pub preamble: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            storage: StorageSettings { dir: "vector_store".to_string() },
            chunking: ChunkingSettings::default(),
            embedding: EmbeddingSettings {
                backend: EmbeddingBackend::Bert,
                model_dir: "models/all-MiniLM-L6-v2".to_string(),
                dim: 384,
                max_len: 256,
                batch_size: 32,
            },
            retrieval: RetrievalSettings { default_k: 3 },
            timeouts: TimeoutSettings { loader_secs: 120, embed_secs: 120 },
            prompt: PromptSettings {
                preamble: "You are a helpful assistant. Use only the provided context to answer the question. \
If the answer is not in the context, say that you do not have that information."
                    .to_string(),
            },
        }
    }
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self { chunk_size: 1000, chunk_overlap: 200 }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        let c = &self.chunking;
        if c.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunking.chunk_size must be > 0".into()));
        }
        if c.chunk_overlap >= c.chunk_size {
            return Err(Error::InvalidConfig(format!(
                "chunking.chunk_overlap ({}) must be smaller than chunk_size ({})",
                c.chunk_overlap, c.chunk_size
            )));
        }
        if self.retrieval.default_k == 0 {
            return Err(Error::InvalidConfig("retrieval.default_k must be > 0".into()));
        }
        if self.embedding.dim == 0 || self.embedding.batch_size == 0 || self.embedding.max_len == 0 {
            return Err(Error::InvalidConfig("embedding.dim, max_len and batch_size must be > 0".into()));
        }
        Ok(())
    }

    /// Storage directory with `~` and env vars expanded, relative to `base`.
    pub fn storage_dir(&self, base: &Path) -> PathBuf {
        resolve_with_base(base, &self.storage.dir)
    }

    pub fn model_dir(&self, base: &Path) -> PathBuf {
        resolve_with_base(base, &self.embedding.model_dir)
    }

    pub fn loader_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.loader_secs)
    }

    pub fn embed_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.embed_secs)
    }
}

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        let figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file("docrag.toml"))
            .merge(Toml::file(format!("docrag.{}.toml", normalize_env(&env_name))))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        tracing::debug!(env = %env_name, "configuration sources merged");
        Self::from_figment(figment)
    }

    /// Defaults overlaid with the given TOML document; no files or env.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        Self::from_figment(Figment::from(Serialized::defaults(Settings::default())).merge(Toml::string(toml)))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config = Self { figment };
        config.settings()?.validate()?;
        Ok(config)
    }

    pub fn settings(&self) -> Result<Settings> {
        self.figment
            .extract()
            .map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| Error::InvalidConfig(format!("Failed to get '{key}': {e}")))
    }
}

fn normalize_env(env: &str) -> &str {
    match env {
        "dev" | "development" => "dev",
        "prod" | "production" => "prod",
        "test" | "testing" => "test",
        other => other,
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
