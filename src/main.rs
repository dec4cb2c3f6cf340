//! # pbench-index CLI
//!
//! Turns an extracted pbench run directory into normalized documents and
//! stores them in the configured sink.
//!
//! ## Usage
//!
//! ```bash
//! pbench-index --config ./config/pbench-index.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pbench-index init` | Create the SQLite sink schema |
//! | `pbench-index index <run-dir>` | Index one run |
//! | `pbench-index handlers` | List the tool handler table |
//! | `pbench-index stats` | Document counts per index in the SQLite sink |
//!
//! ## Exit status
//!
//! 0 on success, 1 when the sink rejected documents, otherwise the code
//! of the fatal [`IndexError`] (3 configuration, 4 unsupported archive,
//! 5 bad date, 6 missing file, 7 bad `metadata.log`, 10 bad sosreport
//! hostname, 12 anything else).

use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use pbench_index::config::{self, Config};
use pbench_index::error::{IndexError, EXIT_INDEXING_FAILURES};
use pbench_index::ingest::{self, IndexOptions};
use pbench_index::migrate;
use pbench_index::progress::ProgressMode;
use pbench_index::registry::HandlerRegistry;
use pbench_index::stats;

const DEFAULT_CONFIG: &str = "./config/pbench-index.toml";

/// pbench-index: unify benchmark tool data into content-addressed documents.
#[derive(Parser)]
#[command(
    name = "pbench-index",
    about = "Turn pbench run directories into normalized, content-addressed documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/pbench-index.toml`; built-in defaults are used
    /// when that file does not exist.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the SQLite sink database and its tables.
    ///
    /// Idempotent; running it again is safe.
    Init,

    /// Index one extracted run directory.
    Index {
        /// The run directory (contains `metadata.log`).
        run_dir: PathBuf,

        /// Run id to use instead of the one in `<run-dir>.tar.xz.md5`.
        #[arg(long)]
        run_id: Option<String>,

        /// JSON object stored as `user_specified_metadata` in the run document.
        #[arg(long)]
        metadata: Option<String>,

        /// Produce every document but store nothing.
        #[arg(long)]
        dry_run: bool,

        /// Progress on stderr. Defaults to human when stderr is a terminal.
        #[arg(long, value_enum)]
        progress: Option<ProgressArg>,
    },

    /// List the tool handler table.
    Handlers,

    /// Show per-index document counts of the SQLite sink.
    Stats,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

impl From<ProgressArg> for ProgressMode {
    fn from(arg: ProgressArg) -> Self {
        match arg {
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(p) => config::load_config(p),
        None => {
            let default = Path::new(DEFAULT_CONFIG);
            if default.exists() {
                config::load_config(default)
            } else {
                tracing::debug!("No {} found, using built-in defaults", DEFAULT_CONFIG);
                Ok(Config::default())
            }
        }
    }
}

fn print_handlers(registry: &HandlerRegistry) {
    println!("{:<22} {:<8} {:<30} {}", "TOOL", "DATA", "METHOD", "RECORDS");
    println!("{}", "-".repeat(70));
    for (name, handler) in registry.entries() {
        match handler {
            Some(h) => println!(
                "{:<22} {:<8} {:<30} {}",
                name,
                h.prospectus.handling().to_string(),
                h.prospectus.method().to_string(),
                h.records.len()
            ),
            None => println!("{:<22} {:<8} {:<30} -", name, "-", "(not indexed)"),
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    if let Commands::Handlers = cli.command {
        print_handlers(&HandlerRegistry::standard()?);
        return Ok(ExitCode::SUCCESS);
    }

    let cfg = resolve_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Sink database initialized at {}.", cfg.sink.path.display());
        }
        Commands::Index {
            run_dir,
            run_id,
            metadata,
            dry_run,
            progress,
        } => {
            let opts = IndexOptions {
                run_dir,
                run_id,
                metadata_json: metadata,
                dry_run,
            };
            let mode = progress
                .map(ProgressMode::from)
                .unwrap_or_else(ProgressMode::default_for_tty);
            let summary = ingest::run_index(&cfg, &opts, mode).await?;
            if summary.failed > 0 {
                return Ok(ExitCode::from(EXIT_INDEXING_FAILURES));
            }
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Handlers => {}
    }

    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            let code = err
                .downcast_ref::<IndexError>()
                .map(IndexError::exit_code)
                .unwrap_or(12);
            ExitCode::from(code)
        }
    }
}
