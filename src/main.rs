//! # Knowledge Harness CLI (`kh`)
//!
//! ## Usage
//!
//! ```bash
//! kh --config ./config/kh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kh init` | Create data directories and the index database |
//! | `kh ingest <file>` | Ingest Q&A pairs from JSON (`-` for stdin) |
//! | `kh search "<query>"` | Search learned knowledge |
//! | `kh answer "<question>"` | Answer from learned knowledge |
//! | `kh capture` | Record a chat interaction for later learning |
//! | `kh load [file]` | Load one spreadsheet, or run daily ingestion |
//! | `kh learn` | Learn from unprocessed interactions now |
//! | `kh backup` | Export knowledge and prune old backups now |
//! | `kh status` | Show scheduler and pipeline status |
//! | `kh stats` | Show learning statistics |
//! | `kh export` | Export all learned knowledge as JSON |
//! | `kh clear --yes` | Delete all learned knowledge |
//! | `kh repair` | Re-index learned pairs missing from the index |
//! | `kh run` | Run the scheduler until Ctrl-C |
//!
//! Logs go to stderr and honour `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use knowledge_harness::app::Harness;
use knowledge_harness::config::{self, Config};
use knowledge_harness::scheduler::JobKind;
use knowledge_harness::{commands, export, stats};

const DEFAULT_CONFIG: &str = "./config/kh.toml";

/// Knowledge Harness CLI: learned Q&A, spreadsheet ingestion, and scheduled
/// maintenance for a local knowledge base.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/kh.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "kh",
    about = "Knowledge Harness: learned Q&A, spreadsheet ingestion, and scheduled maintenance",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// When the default file does not exist, built-in defaults rooted at
    /// `./data` are used.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directories and index database.
    ///
    /// Idempotent; running it again is safe.
    Init,

    /// Ingest Q&A pairs from a JSON file.
    ///
    /// Accepts a single `{question, answer}` object, an array of them, or
    /// `{"qa_pairs": [...], "session_info": {...}}`.
    Ingest {
        /// JSON file, or `-` to read stdin.
        file: PathBuf,
    },

    /// Search learned knowledge by similarity.
    Search {
        query: String,

        /// Maximum number of results.
        #[arg(long)]
        limit: Option<usize>,

        /// Drop results below this confidence (0.0 - 1.0).
        #[arg(long)]
        min_confidence: Option<f64>,
    },

    /// Answer a question from learned knowledge.
    Answer {
        question: String,

        /// Minimum confidence to accept an answer (0.0 - 1.0).
        #[arg(long)]
        threshold: Option<f64>,
    },

    /// Record a chat interaction for the learning job.
    Capture {
        #[arg(long)]
        query: String,

        #[arg(long)]
        response: String,

        /// Extra metadata as `key=value` pairs.
        #[arg(long = "meta", value_parser = parse_key_val)]
        meta: Vec<(String, String)>,
    },

    /// Load a spreadsheet into the operations index.
    ///
    /// Without a file, runs the daily ingestion job over the inbox.
    Load {
        file: Option<PathBuf>,

        /// Move the file into the backup directory after a complete load.
        #[arg(long)]
        archive: bool,
    },

    /// Learn from unprocessed chat interactions now.
    Learn,

    /// Export learned knowledge into the backup directory and prune old
    /// backups now.
    Backup,

    /// Run one scheduled job by name (`ingestion`, `learning`, `backup`).
    Job {
        #[arg(value_parser = parse_job)]
        name: JobKind,
    },

    /// Show scheduler and pipeline status.
    Status {
        /// Print machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show learning statistics.
    Stats,

    /// Export all learned knowledge as JSON.
    Export {
        /// Write to this file instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Delete all learned knowledge.
    Clear {
        /// Confirm deletion.
        #[arg(long)]
        yes: bool,
    },

    /// Re-index learned pairs missing from the index.
    Repair,

    /// Run the scheduler until Ctrl-C.
    Run,
}

/// Parse a `key=value` pair for `--meta` arguments.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn parse_job(s: &str) -> Result<JobKind, String> {
    s.parse::<JobKind>().map_err(|e| e.to_string())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

fn resolve_config(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        return config::load_config(path);
    }
    if path == Path::new(DEFAULT_CONFIG) {
        tracing::info!(config = %path.display(), "no config file; using defaults under ./data");
        return Ok(Config::for_data_dir("./data"));
    }
    anyhow::bail!("Config file not found: {}", path.display())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let cfg = resolve_config(&cli.config)?;
    let harness = Harness::open(&cfg).await?;

    let result = match cli.command {
        Commands::Init => {
            println!(
                "Knowledge harness initialized at {}",
                cfg.paths.data_dir.display()
            );
            Ok(())
        }
        Commands::Ingest { file } => commands::run_ingest(&harness, &file).await,
        Commands::Search {
            query,
            limit,
            min_confidence,
        } => commands::run_search(&harness, &query, limit, min_confidence).await,
        Commands::Answer {
            question,
            threshold,
        } => commands::run_answer(&harness, &question, threshold).await,
        Commands::Capture {
            query,
            response,
            meta,
        } => commands::run_capture(&harness, &query, &response, meta).await,
        Commands::Load { file, archive } => {
            commands::run_load(&harness, file.as_deref(), archive).await
        }
        Commands::Learn => commands::run_job(&harness, JobKind::InteractionLearning).await,
        Commands::Backup => commands::run_job(&harness, JobKind::WeeklyBackup).await,
        Commands::Job { name } => commands::run_job(&harness, name).await,
        Commands::Status { json } => commands::run_status(&harness, json).await,
        Commands::Stats => stats::run_stats(&harness).await,
        Commands::Export { output } => export::run_export(&harness, output.as_deref()).await,
        Commands::Clear { yes } => commands::run_clear(&harness, yes).await,
        Commands::Repair => commands::run_repair(&harness).await,
        Commands::Run => commands::run_scheduler(&harness).await,
    };

    harness.close().await;
    result
}
