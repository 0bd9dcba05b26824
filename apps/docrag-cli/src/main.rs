//! docrag: ingest documents into a local vector store and query them.
//!
//! ```bash
//! # Index a folder of PDFs / Word files (document ids default to the path
//! # under the folder without its extension, e.g. `sub/fees`)
//! docrag ingest ./handbooks
//!
//! # Nearest chunks for a question
//! docrag query "When are hostel fees due?" -k 5
//!
//! # The grounded prompt that would be sent to a language model
//! docrag prompt "When are hostel fees due?"
//!
//! # Preview how a file is chunked, without embedding anything
//! docrag chunk ./handbooks/fees.pdf
//! ```
//!
//! Settings come from `docrag.toml`, `docrag.<RUST_ENV>.toml` and `DOCRAG_*`
//! environment variables.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use docrag_core::chunker::TextSplitter;
use docrag_core::config::{Config, Settings};
use docrag_core::traits::DocumentLoader;
use docrag_core::types::{meta_keys, RetrievedChunk};
use docrag_embed::get_default_embedder;
use docrag_loader::{discover, FileLoader};
use docrag_rag::RagService;

#[derive(Parser)]
#[command(name = "docrag")]
#[command(about = "Local retrieval-augmented generation over your documents")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest files or directories into the vector store
    Ingest {
        /// Files or directories (searched recursively for .pdf, .docx, .txt, .md)
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Document id for a single file (defaults to its path under the
        /// ingested directory, without extension)
        #[arg(long)]
        id: Option<String>,
    },

    /// Print the chunks nearest to a query
    Query {
        text: String,

        /// Number of results (defaults to retrieval.default_k)
        #[arg(short)]
        k: Option<usize>,
    },

    /// Print the grounded prompt for a question
    Prompt {
        question: String,

        #[arg(short)]
        k: Option<usize>,
    },

    /// Show how a file would be chunked
    Chunk {
        file: PathBuf,
    },

    /// Corpus size and storage location
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let settings = Config::load()
        .and_then(|c| c.settings())
        .map_err(|e| {
            eprintln!("Error loading config: {e}");
            e
        })?;
    let base = std::env::current_dir()?;

    match cli.command {
        Commands::Ingest { paths, id } => {
            let service = open(settings, &base).await?;
            ingest(&service, &paths, id).await
        }
        Commands::Query { text, k } => {
            let service = open(settings, &base).await?;
            let hits = service.query(&text, k.unwrap_or(service.default_k())).await?;
            print_hits(&hits);
            Ok(())
        }
        Commands::Prompt { question, k } => {
            let service = open(settings, &base).await?;
            let (prompt, _) = service.prepare_prompt(&question, k.unwrap_or(service.default_k())).await?;
            println!("{prompt}");
            Ok(())
        }
        Commands::Chunk { file } => preview_chunks(&settings, &file),
        Commands::Stats => {
            let stats = open(settings, &base).await?.stats().await;
            println!("storage:    {}", stats.storage_dir.display());
            println!("documents:  {}", stats.documents);
            println!("chunks:     {}", stats.chunks);
            match stats.dimension {
                Some(d) => println!("dimension:  {d}"),
                None => println!("dimension:  -"),
            }
            Ok(())
        }
    }
}

async fn open(settings: Settings, base: &Path) -> Result<RagService> {
    let embedder = get_default_embedder(&settings.embedding, &settings.model_dir(base))?;
    let service = RagService::open(settings, base, embedder, Arc::new(FileLoader::new()))
        .await
        .context("opening vector store")?;
    Ok(service)
}

async fn ingest(service: &RagService, paths: &[PathBuf], id: Option<String>) -> Result<()> {
    let mut files = plan_ingest(paths)?;
    if files.is_empty() {
        bail!("no .pdf, .docx, .txt or .md files found");
    }
    if let Some(id) = id {
        if files.len() > 1 {
            bail!("--id can only be used with a single file ({} found)", files.len());
        }
        files[0].1 = id;
    }
    tracing::info!(files = files.len(), "ingesting");

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files {msg}")?
            .progress_chars("#>-"),
    );

    let mut failed = 0usize;
    for (file, document_id) in &files {
        pb.set_message(document_id.clone());
        match service.ingest(file, document_id).await {
            Ok(report) => pb.println(format!("{} -> {} chunks", file.display(), report.chunk_ids.len())),
            Err(e) => {
                failed += 1;
                pb.println(format!("{}: {e}", file.display()));
            }
        }
        pb.inc(1);
    }
    pb.finish_with_message("done");

    println!("Corpus now holds {} chunks", service.len().await);
    if failed > 0 {
        bail!("{failed} of {} files failed", files.len());
    }
    Ok(())
}

fn preview_chunks(settings: &Settings, file: &Path) -> Result<()> {
    let splitter = TextSplitter::from_settings(&settings.chunking)?;
    let segments = FileLoader::new().load(file)?;
    let chunks = splitter.split_segments(&segments);
    println!("{} chunks (size {}, overlap {})", chunks.len(), splitter.chunk_size(), splitter.chunk_overlap());
    for (i, chunk) in chunks.iter().enumerate() {
        let page = chunk.metadata.get(meta_keys::PAGE).map(|p| format!(" page {p}")).unwrap_or_default();
        println!("\n--- chunk {i}{page} ({} chars) ---", chunk.content.chars().count());
        println!("{}", chunk.content);
    }
    Ok(())
}

fn print_hits(hits: &[RetrievedChunk]) {
    if hits.is_empty() {
        println!("No results (is the store empty?)");
        return;
    }
    for (rank, hit) in hits.iter().enumerate() {
        let source = hit.chunk.metadata.get(meta_keys::SOURCE).map(String::as_str).unwrap_or("-");
        println!("{}. {} (distance {:.4}, {source})", rank + 1, hit.chunk.id, hit.distance);
        println!("   {}", preview(&hit.chunk.content, 200));
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    format!("{}...", flat.chars().take(max_chars).collect::<String>())
}

/// Discovered files paired with their default document ids. Two files that
/// would share an id abort the whole run before anything is ingested.
fn plan_ingest(roots: &[PathBuf]) -> Result<Vec<(PathBuf, String)>> {
    let mut seen: HashMap<String, PathBuf> = HashMap::new();
    let mut files = Vec::new();
    for root in roots {
        for file in discover(root) {
            let id = document_id_for(root, &file);
            if let Some(first) = seen.insert(id.clone(), file.clone()) {
                bail!(
                    "{} and {} would both get document id '{id}'; ingest one of them with --id",
                    first.display(),
                    file.display()
                );
            }
            files.push((file, id));
        }
    }
    Ok(files)
}

/// `file`'s path below `root` without its extension, `/`-separated. A file
/// given directly is named by its stem.
fn document_id_for(root: &Path, file: &Path) -> String {
    let relative = file.strip_prefix(root).ok().filter(|r| !r.as_os_str().is_empty());
    match relative {
        Some(relative) => relative
            .with_extension("")
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
        None => file
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| file.display().to_string()),
    }
}
