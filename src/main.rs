//! # docrag CLI
//!
//! The `docrag` binary drives the documentation ingestion and
//! retrieval pipeline from the command line and starts the HTTP tool
//! server. Every subcommand dispatches through the same tool layer the
//! server exposes, so CLI runs and agent calls behave identically.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docrag ingest <path>` | Ingest local documentation files in batches |
//! | `docrag crawl <url>` | Crawl a site, sitemap, or text file |
//! | `docrag page <url>` | Crawl a single page without following links |
//! | `docrag query "<text>"` | Semantic search over stored chunks |
//! | `docrag sources` | List all ingested sources |
//! | `docrag delete-source <id>` | Remove a source and its chunks |
//! | `docrag serve` | Start the HTTP tool server |
//!
//! ## Examples
//!
//! ```bash
//! # Ingest a docs directory ten files at a time
//! docrag ingest ./docs --batch-size 10
//!
//! # Resume where the previous batch stopped
//! docrag ingest ./docs --start-from chapter-04.md
//!
//! # Crawl everything a sitemap lists
//! docrag crawl https://docs.example.com/sitemap.xml
//!
//! # Ask a question
//! docrag query "how do I configure retries" --limit 5
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use docrag::config::load_config;
use docrag::server::run_server;
use docrag::tools::{Tool as _, ToolContext, ToolRegistry};

/// docrag — documentation ingestion and semantic retrieval for AI
/// agents.
///
/// All commands accept a `--config` flag pointing to a TOML
/// configuration file; endpoints and secrets may also come from the
/// environment, so the flag is optional.
#[derive(Parser)]
#[command(
    name = "docrag",
    about = "Crawl, chunk, embed, and search documentation for AI agents",
    version,
    long_about = "docrag ingests documentation from websites and local files, chunks and embeds \
    it through a remote embedding service, stores everything in a PostgREST-backed vector store, \
    and exposes semantic retrieval via a CLI and an HTTP tool server."
)]
struct Cli {
    /// Path to configuration file (TOML). Environment variables
    /// override file values for endpoints and secrets.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Ingest local documentation files.
    ///
    /// Discovers files under the path (filtered by extension, sorted
    /// deterministically) and processes one batch per invocation. The
    /// report names the next file so a follow-up run can resume with
    /// `--start-from`. Use `--all` to process everything in one run.
    Ingest {
        /// Directory (or single file) to ingest.
        path: PathBuf,

        /// Files to process in this invocation.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Resume from this file path (from a previous report's
        /// `next_file`).
        #[arg(long)]
        start_from: Option<String>,

        /// Process the entire corpus in one run instead of a batch.
        #[arg(long)]
        all: bool,

        /// Do not descend into subdirectories.
        #[arg(long)]
        no_recursive: bool,

        /// Comma-separated extension filter (default from config,
        /// e.g. ".md,.txt,.html,.rst").
        #[arg(long)]
        extensions: Option<String>,
    },

    /// Crawl a URL and ingest everything found.
    ///
    /// Sitemaps are expanded and fetched in parallel, `.txt` files are
    /// stored directly, and ordinary webpages are followed breadth-first
    /// through same-host links.
    Crawl {
        /// Start URL, sitemap URL, or text file URL.
        url: String,

        /// Link-following depth for ordinary webpages.
        #[arg(long)]
        depth: Option<usize>,

        /// Parallel fetch bound.
        #[arg(long)]
        concurrent: Option<usize>,
    },

    /// Crawl one page without following links.
    Page {
        /// Page URL.
        url: String,
    },

    /// Semantic search over stored documentation.
    Query {
        /// Natural-language query.
        query: String,

        /// Restrict results to one source id (see `docrag sources`).
        #[arg(long)]
        source: Option<String>,

        /// Number of results to return (1-50).
        #[arg(long)]
        limit: Option<i64>,
    },

    /// List all ingested sources with summaries and word counts.
    Sources,

    /// Delete a source and every chunk stored under it.
    DeleteSource {
        /// Source identifier to delete.
        source_id: String,
    },

    /// Start the HTTP tool server.
    ///
    /// Binds to `[server].bind` and exposes `/initialize`,
    /// `/tools/list`, and `POST /tools/{name}`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docrag=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    if let Commands::Serve = cli.command {
        return run_server(&config).await;
    }

    let registry = ToolRegistry::with_builtins();
    let ctx = ToolContext::new(Arc::new(config))?;

    let (tool_name, params) = match cli.command {
        Commands::Ingest {
            path,
            batch_size,
            start_from,
            all,
            no_recursive,
            extensions,
        } => {
            let mut params = json!({
                "path": path.to_string_lossy(),
                "recursive": !no_recursive,
            });
            if let Some(n) = batch_size {
                params["batch_size"] = json!(n);
            }
            if let Some(name) = start_from {
                params["start_from"] = json!(name);
            }
            if let Some(exts) = extensions {
                params["extensions"] = json!(exts);
            }
            let tool = if all {
                "crawl_local_files"
            } else {
                "crawl_local_files_batch"
            };
            (tool, params)
        }
        Commands::Crawl {
            url,
            depth,
            concurrent,
        } => {
            let mut params = json!({ "url": url });
            if let Some(d) = depth {
                params["max_depth"] = json!(d);
            }
            if let Some(c) = concurrent {
                params["max_concurrent"] = json!(c);
            }
            ("smart_crawl_url", params)
        }
        Commands::Page { url } => ("crawl_single_page", json!({ "url": url })),
        Commands::Query {
            query,
            source,
            limit,
        } => {
            let mut params = json!({ "query": query });
            if let Some(s) = source {
                params["source"] = json!(s);
            }
            if let Some(n) = limit {
                params["match_count"] = json!(n);
            }
            ("perform_rag_query", params)
        }
        Commands::Sources => ("get_available_sources", json!({})),
        Commands::DeleteSource { source_id } => {
            ("delete_source", json!({ "source_id": source_id }))
        }
        Commands::Serve => unreachable!("handled above"),
    };

    let tool = registry
        .find(tool_name)
        .expect("built-in tool is registered");
    let result = tool.execute(params, &ctx).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    // Tool failures are structured, not panics; reflect them in the
    // exit code for scripting.
    if result["success"] == false {
        std::process::exit(1);
    }
    Ok(())
}
