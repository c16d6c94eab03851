//! TensorWasm CLI - run compiled tensor-graph bundles from the command line.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tensorwasm_runtime::observability::{LogFormat, TracingConfig, TracingGuard, init_tracing};

/// TensorWasm - host bridge for WebAssembly tensor-graph modules.
#[derive(Parser)]
#[command(name = "tensorwasm")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show bundle metadata, module exports and global functions
    Inspect {
        /// Bundle directory containing manifest.json
        bundle: PathBuf,

        /// Also list every module export
        #[arg(short, long)]
        exports: bool,
    },

    /// Classify a raw little-endian input file
    Run {
        /// Bundle directory containing manifest.json
        bundle: PathBuf,

        /// Input tensor as raw little-endian bytes in the input dtype
        #[arg(short, long)]
        input: PathBuf,

        /// Number of ranked classes to print
        #[arg(short = 'k', long, default_value = "5")]
        top: usize,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Benchmark graph execution
    Bench {
        /// Bundle directory containing manifest.json
        bundle: PathBuf,

        /// Runs per timed batch
        #[arg(short, long, default_value = "10")]
        number: usize,

        /// Number of timed batches
        #[arg(short, long, default_value = "3")]
        repeat: usize,

        /// Optional input file; zeros are used otherwise
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Show version information
    Version,
}

fn setup_logging(verbosity: u8) -> Result<TracingGuard> {
    // Check for explicit log format override, otherwise auto-detect
    let log_format = std::env::var("TENSORWASM_LOG_FORMAT")
        .ok()
        .and_then(|s| s.parse::<LogFormat>().ok())
        .unwrap_or_else(|| {
            if std::io::IsTerminal::is_terminal(&std::io::stderr()) {
                LogFormat::Pretty
            } else {
                LogFormat::Compact
            }
        });

    let mut builder = TracingConfig::builder()
        .log_format(log_format)
        .verbosity(verbosity);
    // RUST_LOG wins over -v
    if let Ok(filter) = std::env::var("RUST_LOG") {
        builder = builder.log_filter(filter);
    }

    init_tracing(builder.build())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _tracing_guard = setup_logging(cli.verbose)?;

    match cli.command {
        Commands::Inspect { bundle, exports } => commands::inspect::run(&bundle, exports).await,
        Commands::Run {
            bundle,
            input,
            top,
            json,
        } => commands::run::run(&bundle, &input, top, json).await,
        Commands::Bench {
            bundle,
            number,
            repeat,
            input,
        } => commands::bench::run(&bundle, number, repeat, input.as_deref()).await,
        Commands::Version => commands::version::run(),
    }
}
