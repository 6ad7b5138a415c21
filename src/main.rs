//! # Product Search CLI (`psearch`)
//!
//! The `psearch` binary loads a product catalogue into SQLite, generates
//! embeddings, runs hybrid searches and serves the HTTP API.
//!
//! ## Usage
//!
//! ```bash
//! psearch --config ./config/psearch.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `psearch init` | Create the SQLite database and run schema migrations |
//! | `psearch ingest <file>` | Upsert products from JSON Lines or a JSON array |
//! | `psearch embed pending` | Backfill missing or stale embeddings |
//! | `psearch embed rebuild` | Delete and regenerate all embeddings |
//! | `psearch search "<query>"` | Hybrid search |
//! | `psearch index status` | Build the lexical index and report corpus counts |
//! | `psearch index rebuild` | Rebuild the lexical index from the current corpus |
//! | `psearch serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! psearch init
//! psearch ingest ./data/products.jsonl
//! psearch search "sony camera under \$800" --explain
//! psearch search "tripod" --semantic-weight 0.3 --json
//! psearch serve
//! ```
//!
//! Logs go to stderr. `RUST_LOG` overrides the default level (`warn`, or
//! `info` with `--verbose`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use product_search::{config, embed_cmd, ingest, migrate, search, server};

/// Product Search CLI: hybrid lexical and semantic search over a product
/// catalogue.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/psearch.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "psearch",
    about = "Hybrid product search: BM25 plus embeddings, fused into one ranking",
    version,
    long_about = "Product Search ingests product records into SQLite, embeds them, and \
    answers queries by fusing BM25 lexical scores with vector similarity. Query intent \
    (price ceilings, brands, colours) filters the results. Available as a CLI and an HTTP API."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/psearch.toml")]
    config: PathBuf,

    /// Log at info level instead of warn.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the product and vector tables.
    /// Safe to run more than once.
    Init,

    /// Ingest products from a file.
    ///
    /// Accepts JSON Lines (one product per line) or a single JSON array.
    /// Records with an `id` replace the product with that id; records
    /// without one are assigned a new id.
    Ingest {
        /// Path to the product file.
        file: PathBuf,

        /// Maximum number of records to ingest.
        #[arg(long)]
        limit: Option<usize>,

        /// Parse and count records without writing to the database.
        #[arg(long)]
        dry_run: bool,
    },

    /// Manage embedding vectors.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Search products.
    ///
    /// Prints the fused ranking with scores. Semantic scoring needs an
    /// embedding provider; without one, results are lexical only.
    Search {
        /// The search query string.
        query: String,

        /// Number of results to return.
        #[arg(long)]
        top_k: Option<usize>,

        /// Weight of the semantic score in [0, 1]. 0 is lexical only.
        #[arg(long)]
        semantic_weight: Option<f64>,

        /// Show per-result lexical and semantic components.
        #[arg(long)]
        explain: bool,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Inspect or rebuild the lexical index.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Start the HTTP server.
    Serve,
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed products whose vectors are missing or stale.
    Pending {
        /// Maximum number of products to embed.
        #[arg(long)]
        limit: Option<usize>,

        /// Override the configured batch size.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Report how many products are pending without embedding them.
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete all vectors and regenerate them.
    Rebuild {
        /// Override the configured batch size.
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

#[derive(Subcommand)]
enum IndexAction {
    /// Build the index and report corpus counts.
    Status,
    /// Re-read the corpus and build a fresh index.
    Rebuild,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            file,
            limit,
            dry_run,
        } => {
            ingest::run_ingest(&cfg, &file, limit, dry_run).await?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending {
                limit,
                batch_size,
                dry_run,
            } => {
                embed_cmd::run_embed_pending(&cfg, limit, batch_size, dry_run).await?;
            }
            EmbedAction::Rebuild { batch_size } => {
                embed_cmd::run_embed_rebuild(&cfg, batch_size).await?;
            }
        },
        Commands::Search {
            query,
            top_k,
            semantic_weight,
            explain,
            json,
        } => {
            search::run_search(&cfg, &query, top_k, semantic_weight, explain, json).await?;
        }
        Commands::Index { action } => match action {
            IndexAction::Status => search::run_index(&cfg, false).await?,
            IndexAction::Rebuild => search::run_index(&cfg, true).await?,
        },
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
