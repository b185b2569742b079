//! piieval CLI: evaluate PII redaction against ground-truth references.
//!
//! Also redacts raw documents with an LLM and manages configuration.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// piieval: judge redacted documents and report precision, recall and F1 per label
#[derive(Parser, Debug)]
#[command(name = "piieval", version, about, long_about = None)]
struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

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
    /// Judge candidate files against ground-truth files and print the corpus report
    Evaluate {
        /// Directory of redacted candidate files
        #[arg(long)]
        candidates: Option<PathBuf>,

        /// Directory of ground-truth labeled files
        #[arg(long)]
        ground_truth: Option<PathBuf>,

        /// Directory for evaluation_report.json
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Pair files by sorted position instead of by name
        #[arg(long)]
        positional: bool,

        /// Judge model to use
        #[arg(short, long)]
        model: Option<String>,

        /// Print a line per document pair before the corpus table
        #[arg(long)]
        per_file: bool,
    },
    /// Redact every .txt file of a directory with the redactor model
    Redact {
        /// Directory of raw documents
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Directory for the redacted documents
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Redactor model to use
        #[arg(short, long)]
        model: Option<String>,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Create default configuration file
    Init,
    /// Show current configuration
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

    let log_dir = directories::ProjectDirs::from("dev", "piieval", "piieval")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "piieval.log");
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

    commands::handle_command(cli.command, &workspace).await
}
