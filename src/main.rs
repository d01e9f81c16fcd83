//! # docqa CLI
//!
//! The `docqa` binary drives the document question-answering pipeline.
//!
//! ## Usage
//!
//! ```bash
//! docqa --config ./config/docqa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docqa init` | Create the SQLite store and run schema migrations |
//! | `docqa ingest` | Parse, chunk, and index the configured documents |
//! | `docqa embed pending` | Backfill missing or stale embeddings |
//! | `docqa embed rebuild` | Delete and regenerate all embeddings |
//! | `docqa search "<query>"` | Inspect retrieval results |
//! | `docqa ask "<question>"` | Answer a question from the documents |
//! | `docqa stats` | Show store statistics |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use docqa::{config, db, embedding, ingest, migrate, pipeline, retrieve, semantic, stats};

/// docqa — a grounded document question-answering pipeline with
/// hybrid retrieval.
///
/// All commands accept a `--config` flag pointing to a TOML
/// configuration file. See `config/docqa.example.toml` for a full
/// example.
#[derive(Parser)]
#[command(
    name = "docqa",
    about = "docqa — grounded question answering over a document collection",
    version,
    long_about = "docqa ingests PDF and markdown documents, indexes them for hybrid \
    (semantic + lexical) retrieval, and answers questions grounded in the retrieved \
    passages via a configured language model."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docqa.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the store schema.
    ///
    /// Creates the SQLite database file and all required tables.
    /// Idempotent — running it multiple times is safe.
    Init,

    /// Parse, chunk, and index the configured documents.
    ///
    /// Scans the documents root, splits each parsed document into
    /// heading-aware chunks, and stores the canonical chunk sequence.
    /// When an embedding provider is configured, vectors are
    /// backfilled inline; failures there are non-fatal and can be
    /// resumed with `embed pending`.
    Ingest {
        /// Show document and chunk counts without writing anything.
        #[arg(long)]
        dry_run: bool,

        /// Maximum number of documents to process.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Manage embedding vectors.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Inspect retrieval results for a query.
    Search {
        /// The search query string.
        query: String,

        /// Search mode: `lexical` (BM25), `semantic` (vector), or
        /// `hybrid` (weighted fusion with query expansion).
        #[arg(long, default_value = "lexical")]
        mode: String,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Answer a question grounded in the indexed documents.
    ///
    /// Runs the full pipeline: query expansion, hybrid retrieval, and
    /// grounded synthesis. Requires both an embedding provider and a
    /// language model to be configured.
    Ask {
        /// The question to answer.
        question: String,

        /// Also list the retrieved source passages.
        #[arg(long)]
        show_sources: bool,
    },

    /// Show store statistics.
    Stats,
}

/// Embedding management subcommands.
#[derive(Subcommand)]
enum EmbedAction {
    /// Embed chunks that are missing or have stale embeddings.
    Pending {
        /// Maximum number of chunks to embed in this run.
        #[arg(long)]
        limit: Option<usize>,

        /// Override the batch size from config.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Show counts without performing any embedding.
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete and regenerate all embeddings.
    ///
    /// Useful when switching embedding models or dimensions.
    Rebuild {
        /// Override the batch size from config.
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Store initialized successfully.");
        }
        Commands::Ingest { dry_run, limit } => {
            ingest::run_ingest(&cfg, dry_run, limit).await?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending {
                limit,
                batch_size,
                dry_run,
            } => {
                run_embed_pending(&cfg, limit, batch_size, dry_run).await?;
            }
            EmbedAction::Rebuild { batch_size } => {
                run_embed_rebuild(&cfg, batch_size).await?;
            }
        },
        Commands::Search { query, mode, limit } => {
            retrieve::run_search(&cfg, &query, &mode, limit).await?;
        }
        Commands::Ask {
            question,
            show_sources,
        } => {
            pipeline::run_ask(&cfg, &question, show_sources).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}

async fn run_embed_pending(
    cfg: &config::Config,
    limit: Option<usize>,
    batch_size: Option<usize>,
    dry_run: bool,
) -> anyhow::Result<()> {
    if !cfg.embedding.is_enabled() {
        anyhow::bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let provider = embedding::create_provider(&cfg.embedding)?;
    let pool = db::connect(cfg).await?;
    let index = semantic::SemanticIndex::new(pool.clone(), cfg.store.collection.clone());

    if dry_run {
        let pending = index.pending_count(provider.model_name()).await?;
        println!("embed pending (dry-run)");
        println!("  chunks needing embeddings: {}", pending);
        pool.close().await;
        return Ok(());
    }

    let batch = batch_size.unwrap_or(cfg.embedding.batch_size);
    let result = index.embed_pending(provider.as_ref(), batch, limit).await?;

    println!("embed pending");
    println!("  total pending: {}", result.total);
    println!("  embedded: {}", result.embedded);
    println!("  failed: {}", result.failed);

    pool.close().await;
    Ok(())
}

async fn run_embed_rebuild(
    cfg: &config::Config,
    batch_size: Option<usize>,
) -> anyhow::Result<()> {
    if !cfg.embedding.is_enabled() {
        anyhow::bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let provider = embedding::create_provider(&cfg.embedding)?;
    let pool = db::connect(cfg).await?;
    let index = semantic::SemanticIndex::new(pool.clone(), cfg.store.collection.clone());

    let batch = batch_size.unwrap_or(cfg.embedding.batch_size);
    let result = index.rebuild(provider.as_ref(), batch).await?;

    println!("embed rebuild");
    println!("  total chunks: {}", result.total);
    println!("  embedded: {}", result.embedded);
    println!("  failed: {}", result.failed);

    pool.close().await;
    Ok(())
}
