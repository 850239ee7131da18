//! Ragcheck CLI: checkpointed RAG evaluation runs from the terminal.
//!
//! Runs a dataset through the scoring service, resumes interrupted sessions
//! and manages stored checkpoints.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Ragcheck: resilient, resumable RAG evaluation
#[derive(Parser, Debug)]
#[command(name = "ragcheck", version, about, long_about = None)]
struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Print reports and listings as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Evaluate a dataset in a new checkpointed session
    Run(RunArgs),
    /// Inspect a stored session, or finish it over the same dataset
    Resume {
        /// Session ID
        session_id: String,
        /// Dataset the session was started on (required to continue)
        #[arg(short, long)]
        dataset: Option<PathBuf>,
        /// Scoring service endpoint override
        #[arg(long)]
        endpoint: Option<String>,
    },
    /// Manage stored sessions
    Sessions {
        #[command(subcommand)]
        action: SessionsAction,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args, Debug, Clone, Default)]
struct RunArgs {
    /// JSON file holding an array of records
    #[arg(short, long)]
    dataset: PathBuf,
    /// Dataset name (defaults to the file stem)
    #[arg(short, long)]
    name: Option<String>,
    /// Scoring service endpoint override
    #[arg(long)]
    endpoint: Option<String>,
    /// Domain for custom judge instructions (e.g. medical, legal)
    #[arg(long)]
    domain: Option<String>,
    /// Records per chunk
    #[arg(long)]
    chunk_size: Option<usize>,
}

#[derive(clap::Subcommand, Debug)]
enum SessionsAction {
    /// List stored sessions, most recent first
    List,
    /// Show one session's progress and results
    Show {
        /// Session ID
        session_id: String,
    },
    /// Delete a stored session
    Delete {
        /// Session ID
        session_id: String,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Create a default config file in the workspace
    Init,
    /// Print the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "ragcheck", "ragcheck")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "ragcheck.log");
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

    commands::handle_command(cli.command, &workspace, cli.json).await
}
