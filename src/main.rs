//! ctxsync - Incremental file-tree sync and content aggregation
//!
//! ctxsync provides:
//! - Tree building with exclusion patterns and an optional ignore file
//! - Selection that cascades down and is recomputed up the tree
//! - Content aggregation with replace rules, batching and token estimates
//! - A watch mode that patches the tree as the filesystem changes
//! - Unified output format (jsonl/json/md/raw)

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;

fn main() -> Result<()> {
    // Check for unsupported platforms
    #[cfg(windows)]
    {
        eprintln!("Error: Windows is not supported. Please use WSL (not guaranteed to work).");
        std::process::exit(1);
    }

    let cli = cli::Cli::parse();
    init_tracing(cli.quiet, cli.verbose);
    cli::run(cli)
}

/// Log to stderr so stdout stays machine-readable
fn init_tracing(quiet: bool, verbose: bool) {
    let default_level = if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
