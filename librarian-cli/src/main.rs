//! Librarian CLI: terminal interface for the evidence validation pipeline.
//!
//! Runs research questions end to end and inspects persisted runs.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Librarian: multi-stage literature review with red-team citation checks
#[derive(Parser, Debug)]
#[command(name = "librarian", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (its `.librarian/config.toml` is loaded if present)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path (replaces user and workspace config files)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run a research question through the full pipeline
    Run {
        /// The research question
        question: String,

        /// LLM model to use
        #[arg(short, long)]
        model: Option<String>,

        /// Write the final report to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Inspect persisted runs
    Runs {
        #[command(subcommand)]
        action: RunsAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Create default configuration file in the workspace
    Init,
    /// Show current configuration and any warnings
    Show,
}

#[derive(clap::Subcommand, Debug)]
enum RunsAction {
    /// List saved runs, most recent first
    List,
    /// Show one run's status and final report
    Show {
        /// Run ID
        id: String,

        /// Print every stage record (prompt and raw response) as JSON
        #[arg(long)]
        records: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn,librarian_core=info",
        1 => "debug",
        _ => "trace",
    };

    // Human-readable stderr; stdout carries reports.
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)));

    let log_dir = directories::ProjectDirs::from("org", "discernus", "librarian")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from(".librarian/logs"));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "librarian.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let ctx = commands::Context {
        workspace,
        config_path: cli.config,
        quiet: cli.quiet,
    };
    commands::handle_command(cli.command, &ctx).await
}
