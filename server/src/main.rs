//! fathom binary — thin CLI shell over the [`fathom`] library crate.

use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use fathom::api::{self, AppContext};
use fathom::config;
use fathom::embed::EmbeddingClient;
use fathom::query;
use fathom::types::IndexCache;
use fathom::update;

// ---------------------------------------------------------------------------
// CLI definition (clap derive)
// ---------------------------------------------------------------------------

/// Local code and document search engine — semantic and ripgrep search over
/// versioned on-disk indexes, served over HTTP and MCP.
#[derive(Parser)]
#[command(name = "fathom", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a folder (or, with --repo, a git repository) to the configuration
    Add {
        /// Path to index
        path: PathBuf,

        /// Treat the path as a git repository (must contain a .git)
        #[arg(long)]
        repo: bool,
    },
    /// Remove a folder or git repository from the configuration
    Remove {
        /// Previously added path
        path: PathBuf,
    },
    /// List configured targets
    List,
    /// Show the on-disk indexes
    Show,
    /// Build or update the index of every configured target
    IndexAll,
    /// Re-run the incremental update on an interval, forever
    #[command(name = "index-watch", visible_alias = "watch")]
    Watch {
        /// Seconds between passes (minimum 1)
        #[arg(long, default_value_t = 60)]
        interval: u64,
    },
    /// Search the indexes (lexical by default, --semantic for embeddings)
    Search {
        /// Pattern (lexical) or natural-language query (semantic)
        query: String,

        /// Use embedding search instead of ripgrep
        #[arg(long)]
        semantic: bool,

        /// Hard cap on returned results
        #[arg(long, default_value_t = query::DEFAULT_MAX_RESULTS)]
        max_results: usize,

        /// Embedding model override (semantic only)
        #[arg(long)]
        model: Option<String>,

        /// Restrict semantic hits to these extensions (repeatable)
        #[arg(long = "ext")]
        extensions: Vec<String>,

        /// Match case-sensitively (lexical only)
        #[arg(long)]
        case_sensitive: bool,
    },
    /// Serve the HTTP API
    Serve {
        /// Port to bind
        #[arg(long, default_value_t = 8417)]
        port: u16,

        /// Bind to 0.0.0.0 instead of 127.0.0.1
        #[arg(long)]
        bind_all: bool,
    },
    /// Run as MCP stdio server
    Mcp,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

// ---------------------------------------------------------------------------
// Graceful shutdown signal
// ---------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl+C");
        info!("Received Ctrl+C, shutting down...");
    }
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn run_add(path: &PathBuf, repo: bool) -> fathom::Result<()> {
    let canonical = path
        .canonicalize()
        .map_err(|e| fathom::Error::Config(format!("{}: {e}", path.display())))?;
    if repo && !canonical.join(".git").exists() {
        return Err(fathom::Error::Config(format!(
            "{} is not a git repository (no .git)",
            canonical.display()
        )));
    }

    let mut config = config::load_or_init()?;
    let entry = canonical.to_string_lossy().to_string();
    let list = if repo { &mut config.git_repos } else { &mut config.folders };
    if list.contains(&entry) {
        println!("Already configured: {entry}");
        return Ok(());
    }
    list.push(entry.clone());
    config::save(&config)?;
    println!("Added {} {entry}", if repo { "repo" } else { "folder" });
    Ok(())
}

fn run_remove(path: &PathBuf) -> fathom::Result<()> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.clone());
    let entry = canonical.to_string_lossy().to_string();

    let mut config = config::load_or_init()?;
    let before = config.folders.len() + config.git_repos.len();
    config.folders.retain(|f| f != &entry);
    config.git_repos.retain(|r| r != &entry);
    if config.folders.len() + config.git_repos.len() == before {
        println!("Not configured: {entry}");
        return Ok(());
    }
    config::save(&config)?;
    println!("Removed {entry}");
    Ok(())
}

fn run_list() -> fathom::Result<()> {
    let config = config::load_or_init()?;
    if config.folders.is_empty() && config.git_repos.is_empty() {
        println!("No targets configured. Use `fathom add <path>`.");
        return Ok(());
    }
    for folder in &config.folders {
        println!("folder  {folder}");
    }
    for repo in &config.git_repos {
        println!("repo    {repo}");
    }
    Ok(())
}

fn run_show() -> fathom::Result<()> {
    let cache = IndexCache::new();
    let infos = query::show_indexes(&cache)?;
    if infos.is_empty() {
        println!("No indexes on disk. Run `fathom index-all` first.");
        return Ok(());
    }
    for info in infos {
        let git = match (&info.latest_commit_hash, info.is_dirty) {
            (Some(hash), Some(dirty)) => {
                let short = &hash[..hash.len().min(8)];
                format!("  @{short}{}", if dirty { " (dirty)" } else { "" })
            }
            _ => String::new(),
        };
        println!(
            "{:8} {}  {} files, {} fragments{git}",
            info.kind, info.root, info.files, info.fragments
        );
    }
    Ok(())
}

async fn run_index_all() -> fathom::Result<bool> {
    let config = config::load_or_init()?;
    if config.folders.is_empty() && config.git_repos.is_empty() {
        println!("No targets configured. Use `fathom add <path>`.");
        return Ok(true);
    }

    let client = EmbeddingClient::global(&config).clone();
    let mut all_ok = true;
    for (target, kind, outcome) in update::index_all_targets(&config, &client).await {
        match outcome {
            Ok(summary) => println!("{kind} {target}: {summary}"),
            Err(e) => {
                eprintln!("{kind} {target}: {e}");
                all_ok = false;
            }
        }
    }
    Ok(all_ok)
}

async fn run_search(
    query_text: &str,
    semantic: bool,
    max_results: usize,
    model: Option<&str>,
    extensions: &[String],
    case_sensitive: bool,
) -> fathom::Result<()> {
    let config = config::load_or_init()?;
    let cache = IndexCache::new();

    if semantic {
        let client = EmbeddingClient::global(&config).clone();
        let hits = query::semantic_search_all(
            &cache,
            &config,
            &client,
            query_text,
            max_results,
            model,
            extensions,
        )
        .await?;
        if hits.is_empty() {
            println!("No results.");
            return Ok(());
        }
        for hit in hits {
            println!(
                "{:.4}  {}:{}-{}",
                hit.similarity, hit.path, hit.start_line, hit.end_line
            );
        }
    } else {
        let hits =
            query::ripgrep_search_all(&cache, query_text, case_sensitive, max_results).await?;
        if hits.is_empty() {
            println!("No results.");
            return Ok(());
        }
        for hit in hits {
            println!("{}:{}: {}", hit.path, hit.line_number, hit.line_content);
        }
    }
    Ok(())
}

async fn run_serve(port: u16, bind_all: bool) -> fathom::Result<()> {
    let config = config::load_or_init()?;
    let ctx = AppContext::new(config);
    let app = api::router(ctx);

    let bind_addr = if bind_all { "0.0.0.0" } else { "127.0.0.1" };
    let listener = tokio::net::TcpListener::bind(format!("{bind_addr}:{port}"))
        .await
        .map_err(|e| fathom::Error::Config(format!("could not bind {bind_addr}:{port}: {e}")))?;

    info!(port = port, "http://localhost:{port}");
    // Machine-readable line for scripts (not through tracing).
    eprintln!("FATHOM_PORT={port}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| fathom::Error::Config(format!("server error: {e}")))
}

async fn run_watch(interval: u64) -> fathom::Result<()> {
    let config = config::load_or_init()?;
    let client = EmbeddingClient::global(&config).clone();
    tokio::select! {
        _ = fathom::watch::watch(&config, &client, interval) => {}
        _ = shutdown_signal() => {}
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fathom=info".parse().unwrap()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Usage problems exit 1; --help/--version print and exit 0.
            let _ = e.print();
            let code = if e.use_stderr() { 1 } else { 0 };
            std::process::exit(code);
        }
    };

    let outcome: fathom::Result<bool> = match &cli.command {
        Commands::Add { path, repo } => run_add(path, *repo).map(|_| true),
        Commands::Remove { path } => run_remove(path).map(|_| true),
        Commands::List => run_list().map(|_| true),
        Commands::Show => run_show().map(|_| true),
        Commands::IndexAll => run_index_all().await,
        Commands::Watch { interval } => run_watch(*interval).await.map(|_| true),
        Commands::Search {
            query,
            semantic,
            max_results,
            model,
            extensions,
            case_sensitive,
        } => run_search(
            query,
            *semantic,
            *max_results,
            model.as_deref(),
            extensions,
            *case_sensitive,
        )
        .await
        .map(|_| true),
        Commands::Serve { port, bind_all } => run_serve(*port, *bind_all).await.map(|_| true),
        Commands::Mcp => {
            let config = match config::load_or_init() {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("Error: {e}");
                    std::process::exit(2);
                }
            };
            fathom::mcp::run_mcp(AppContext::new(config)).await;
            Ok(true)
        }
        Commands::Completions { shell } => {
            clap_complete::generate(*shell, &mut Cli::command(), "fathom", &mut std::io::stdout());
            Ok(true)
        }
    };

    match outcome {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(2);
        }
    }
}
