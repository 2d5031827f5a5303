use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use kbfuse::KnowledgeBase;
use kbfuse::config::Config;
use kbfuse::embedder::http::HttpEmbedder;
use kbfuse::embedder::mock::HashingEmbedder;
use kbfuse::generator::{Generator, HttpGenerator};
use kbfuse::index::SearchFilter;

#[derive(Parser)]
#[command(name = "kbfuse", version, about = "Hybrid-retrieval knowledge base")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long, default_value = "config.json")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index new, changed, and removed documents
    Ingest {
        /// Drop everything and rebuild both indexes from scratch
        #[arg(long)]
        full: bool,
    },
    /// Search the knowledge base
    Query {
        query: String,

        /// Number of results to return
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Restrict to documents under a directory prefix
        #[arg(long)]
        dir: Option<String>,

        /// Restrict to filenames matching a glob (e.g. "api-*.md")
        #[arg(long)]
        pattern: Option<String>,
    },
    /// Record feedback on a previously returned chunk
    Feedback {
        chunk_id: String,

        #[arg(long, conflicts_with = "dislike")]
        like: bool,

        #[arg(long)]
        dislike: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config).context("Failed to load configuration")?;

    let embedder: Arc<dyn kbfuse::embedder::Embedder> = match &config.embedding_url {
        Some(url) => {
            info!("Using embedding service at {url}");
            Arc::new(
                HttpEmbedder::new(url, &config.model.name, config.model.dimensions)
                    .context("Failed to build embedding client")?,
            )
        }
        None => {
            info!("No embedding service configured, using local hashing embedder");
            Arc::new(HashingEmbedder::new(config.model.dimensions))
        }
    };

    let generator: Option<Arc<dyn Generator>> = match &config.generation_url {
        Some(url) => Some(Arc::new(
            HttpGenerator::new(url).context("Failed to build generation client")?,
        )),
        None => None,
    };

    let kb = KnowledgeBase::open(config, embedder, generator)
        .context("Failed to open knowledge base")?;

    match cli.command {
        Command::Ingest { full } => {
            if full {
                let stats = kb.ingest_full_reindex()?;
                println!(
                    "Reindexed {} documents ({} chunks)",
                    stats.total_docs, stats.total_chunks
                );
            } else {
                let stats = kb.ingest_incremental()?;
                println!(
                    "{} new, {} updated, {} removed ({} chunks written, {} failed)",
                    stats.new, stats.updated, stats.removed, stats.total_chunks, stats.failed
                );
            }
        }
        Command::Query {
            query,
            top_k,
            dir,
            pattern,
        } => {
            let filter = if dir.is_some() || pattern.is_some() {
                Some(SearchFilter {
                    directory: dir,
                    file_pattern: pattern,
                })
            } else {
                None
            };

            let response = kb.retrieve(&query, top_k, filter).await?;
            if response.degraded {
                eprintln!("warning: partial results (a backend was unavailable)");
            }
            if response.citations.is_empty() {
                println!("No matches.");
            } else {
                println!("{}", serde_json::to_string_pretty(&response.citations)?);
            }
        }
        Command::Feedback {
            chunk_id,
            like,
            dislike,
        } => {
            anyhow::ensure!(like || dislike, "pass --like or --dislike");
            kb.record_feedback(&chunk_id, like)?;
            println!("Recorded {} for {chunk_id}", if like { "like" } else { "dislike" });
        }
    }

    Ok(())
}
