//! # Ticket Harness CLI (`tkt`)
//!
//! ## Usage
//!
//! ```bash
//! tkt --config ./config/tkt.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tkt init` | Create the SQLite database and run schema migrations |
//! | `tkt ingest <paths..>` | Load ticket exports and documents |
//! | `tkt search "<query>"` | Hybrid search over ticket fragments |
//! | `tkt context "<query>"` | Print the assembled context block |
//! | `tkt ask "<question>"` | Answer a question from retrieved context |
//! | `tkt stats` | Show store counts and embedding coverage |
//! | `tkt serve` | Start the JSON HTTP server |
//!
//! Logs go to stderr. Set `TKT_LOG` (e.g. `TKT_LOG=debug`) to change the
//! filter; the default is `warn`, or `info` with `--verbose`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ticket_harness::{ask, config, ingest, migrate, search, server, stats};

/// Ticket Harness: hybrid retrieval over support tickets.
#[derive(Parser)]
#[command(
    name = "tkt",
    about = "Ticket Harness: hybrid retrieval and context assembly over support tickets",
    version,
    long_about = "Ticket Harness ingests ticket exports into typed fragments, ranks them with \
    BM25 and embedding similarity fused by Reciprocal Rank Fusion, and assembles the best \
    fragments into a context block for answer generation."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/tkt.toml")]
    config: PathBuf,

    /// Log at info level unless TKT_LOG is set.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Ingest ticket exports (.json, .csv, .xlsx) and documents (.docx, .txt, .md).
    ///
    /// Re-ingesting a ticket replaces its fragments; unchanged fragments
    /// keep their embeddings.
    Ingest {
        /// Files to ingest.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Search ticket fragments.
    Search {
        query: String,

        /// Maximum number of results (overrides `retrieval.final_limit`).
        #[arg(long)]
        limit: Option<usize>,

        /// Show lexical/dense ranks and the fused score per result.
        #[arg(long)]
        explain: bool,
    },

    /// Print the context block for a query.
    Context {
        query: String,

        /// Maximum number of fragments (overrides `retrieval.max_chunks`).
        #[arg(long)]
        max_chunks: Option<usize>,
    },

    /// Answer a question using retrieved context.
    Ask {
        question: String,

        /// Print the context block before the answer.
        #[arg(long)]
        show_context: bool,
    },

    /// Show store statistics.
    Stats,

    /// Start the JSON HTTP server on `[server].bind`.
    Serve,
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("TKT_LOG")
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "info" } else { "warn" }));
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
        Commands::Ingest { paths } => {
            ingest::run_ingest(&cfg, &paths).await?;
        }
        Commands::Search {
            query,
            limit,
            explain,
        } => {
            search::run_search(&cfg, &query, limit, explain).await?;
        }
        Commands::Context { query, max_chunks } => {
            search::run_context(&cfg, &query, max_chunks).await?;
        }
        Commands::Ask {
            question,
            show_context,
        } => {
            ask::run_ask(&cfg, &question, show_context).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
