//! CLI module - Command-line interface definitions and handlers

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use ctxsync::core::model::ReplaceRule;
use ctxsync::core::render::{OutputFormat, RenderConfig};
use ctxsync::core::settings::{BatchOptions, SyncSettings, DEFAULT_BATCH_SIZE};
use ctxsync::core::tokenizer::EstimateMethod;

/// ctxsync - keep a project tree in sync and turn its selection into LLM context.
#[derive(Parser, Debug)]
#[command(name = "ctxsync")]
#[command(
    author,
    version,
    about,
    long_about = r#"ctxsync builds an in-memory tree of a project, tracks which files are
selected, and aggregates the selection into fenced content blocks with token
estimates. The watch command keeps the tree in step with the filesystem.

Every command prints notifications in the selected format (default: jsonl).

Output formats:
- jsonl: one JSON object per line (best for piping into tools/LLMs)
- json: a single JSON array
- md: human-friendly Markdown
- raw: content and tree text only

Examples:
    ctxsync tree --all
    ctxsync --format raw --replace API_KEY=REDACTED content
    ctxsync content --stream --batch-size 5
    ctxsync tokens --method cl100k
    ctxsync --saved state.json watch --expand src
"#
)]
pub struct Cli {
    /// Root directory for all operations.
    #[arg(
        long,
        global = true,
        default_value = ".",
        value_name = "ROOT",
        long_help = "Root directory for all operations (defaults to the current directory).\n\n\
Relative paths given to other flags and to watch commands are resolved against it."
    )]
    pub root: PathBuf,

    /// Output format (jsonl/json/md/raw).
    #[arg(
        long,
        global = true,
        default_value = "jsonl",
        value_name = "FORMAT",
        long_help = "Select the output format for notifications.\n\n\
Supported values:\n\
- jsonl (default)\n\
- json\n\
- md (markdown)\n\
- raw\n\n\
Tip: Prefer raw when you want to paste the aggregated content into a prompt."
    )]
    pub format: String,

    /// Disable colored output (when applicable).
    #[arg(
        long,
        global = true,
        long_help = "Disable colored output. This is useful when piping to files or when your\n\
terminal does not support ANSI colors."
    )]
    pub no_color: bool,

    /// Quiet mode (errors only on stderr).
    #[arg(
        short,
        long,
        global = true,
        long_help = "Only log errors to stderr. Results are still printed to stdout."
    )]
    pub quiet: bool,

    /// Verbose mode (more diagnostics).
    #[arg(
        short,
        long,
        global = true,
        long_help = "Log debug diagnostics to stderr. RUST_LOG overrides both --quiet and\n\
--verbose when set."
    )]
    pub verbose: bool,

    /// Pretty-print JSON/JSONL output with indentation.
    #[arg(
        long,
        global = true,
        long_help = "Pretty-print JSON and JSONL output with indentation for human readability.\n\n\
Has no effect on md/raw formats."
    )]
    pub pretty: bool,

    /// Settings file (JSON).
    #[arg(
        long,
        global = true,
        value_name = "FILE",
        long_help = "Read settings from a JSON file with the keys excludePatterns,\n\
replaceRules and includeIgnoreFile. A missing or malformed file is reported\n\
and the defaults are used instead."
    )]
    pub settings: Option<PathBuf>,

    /// Extra exclude pattern (repeatable).
    #[arg(
        long = "exclude",
        global = true,
        value_name = "PATTERN",
        long_help = "Exclude entries whose name matches PATTERN. Only `*` is a wildcard and\n\
the whole name must match, e.g. `*.log` or `dist`.\n\n\
Added to the patterns from --settings (or the defaults)."
    )]
    pub excludes: Vec<String>,

    /// Replace rule FROM=TO (repeatable).
    #[arg(
        long = "replace",
        global = true,
        value_name = "FROM=TO",
        long_help = "Replace every literal occurrence of FROM with TO in file content and in\n\
tree names. Rules apply in the order given, after rules from --settings."
    )]
    pub replaces: Vec<ReplaceRule>,

    /// Also exclude the patterns listed in ROOT/.gitignore.
    #[arg(long, global = true)]
    pub ignore_file: bool,

    /// Previously saved tree to restore selection from.
    #[arg(
        long,
        global = true,
        value_name = "STATE",
        long_help = "Restore selection from a tree previously printed by `ctxsync snapshot`.\n\n\
The fresh scan decides which paths exist; the saved tree only supplies their\n\
selected flag and last sync time. New paths start unselected."
    )]
    pub saved: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the directory structure.
    #[command(
        long_about = "Scan ROOT and print its directory structure as a tree of\n\
`├──`/`└──` lines.\n\n\
By default only selected entries are shown.\n\n\
Examples:\n\
  ctxsync tree\n\
  ctxsync --format raw tree --all\n"
    )]
    Tree {
        /// Show every entry, not just the selected ones.
        #[arg(long)]
        all: bool,
    },

    /// Print the tree as JSON (the persistable form).
    #[command(
        long_about = "Scan ROOT, restore selection from --saved if given, and print the tree as\n\
a single JSON document. Feed it back later with --saved.\n\n\
Example:\n\
  ctxsync snapshot > state.json\n"
    )]
    Snapshot,

    /// Print the aggregated content of the selection.
    #[command(
        long_about = "Read every selected file, apply replace rules, and print the result as\n\
fenced blocks together with the directory structure and token count.\n\n\
With --stream, files are read in batches and each batch is printed as soon as it\n\
is ready, followed by the running token count.\n\n\
Examples:\n\
  ctxsync --format raw content\n\
  ctxsync content --stream --batch-size 5\n"
    )]
    Content {
        /// Print one record per batch as it is read.
        #[arg(long)]
        stream: bool,

        /// Files per batch.
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE, value_name = "N")]
        batch_size: usize,

        /// Token estimation method.
        #[arg(long, default_value = "max", value_name = "METHOD")]
        method: EstimateMethod,
    },

    /// Print the token estimate of the selection.
    #[command(
        long_about = "Estimate how many LLM tokens the selected content takes.\n\n\
Methods:\n\
- max (default): the larger of words/0.75 and chars/4\n\
- min, average, words, chars: other heuristic variants\n\
- cl100k, o200k: exact counts with a BPE tokenizer\n\n\
Example:\n\
  ctxsync tokens --method cl100k\n"
    )]
    Tokens {
        /// Token estimation method.
        #[arg(long, default_value = "max", value_name = "METHOD")]
        method: EstimateMethod,
    },

    /// Watch ROOT and print every notification (requires 'watch' feature)
    #[cfg(feature = "watch")]
    #[command(
        long_about = "Keep the tree in step with the filesystem and print every notification\n\
until Ctrl-C.\n\n\
Lines on stdin control the session:\n\
  select PATH | deselect PATH | expand PATH | collapse PATH | refresh\n\n\
Example:\n\
  ctxsync watch --expand src --expand tests\n"
    )]
    Watch {
        /// Directory to expand at startup (repeatable).
        #[arg(long, value_name = "DIR")]
        expand: Vec<PathBuf>,

        /// Files per content batch.
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE, value_name = "N")]
        batch_size: usize,

        /// Token estimation method.
        #[arg(long, default_value = "max", value_name = "METHOD")]
        method: EstimateMethod,
    },
}

impl Cli {
    /// Settings file (or defaults) extended by the command-line flags
    pub fn sync_settings(&self) -> SyncSettings {
        let mut settings = match &self.settings {
            Some(path) => SyncSettings::load(path),
            None => SyncSettings::default(),
        };
        settings.exclude_patterns.extend(self.excludes.iter().cloned());
        settings.replace_rules.extend(self.replaces.iter().cloned());
        settings.include_ignore_file |= self.ignore_file;
        settings
    }
}

/// Run the CLI with parsed arguments
pub fn run(cli: Cli) -> Result<()> {
    // Parse output format
    let format: OutputFormat = cli.format.parse().unwrap_or_default();
    let render_config = RenderConfig::with_pretty(format, cli.pretty);

    if cli.no_color {
        colored::control::set_override(false);
    }

    let settings = cli.sync_settings();
    // Get absolute root path
    let root = cli.root.canonicalize().unwrap_or(cli.root);
    let saved = cli.saved.as_deref();

    match cli.command {
        Commands::Tree { all } => {
            ctxsync::flows::selection::run_tree(&root, &settings, saved, all, render_config)
        }

        Commands::Snapshot => {
            ctxsync::flows::selection::run_snapshot(&root, &settings, saved, render_config)
        }

        Commands::Content {
            stream,
            batch_size,
            method,
        } => ctxsync::flows::content::run_content(
            &root,
            &settings,
            saved,
            stream,
            BatchOptions::new(batch_size),
            method,
            render_config,
        ),

        Commands::Tokens { method } => {
            ctxsync::flows::content::run_tokens(&root, &settings, saved, method, render_config)
        }

        #[cfg(feature = "watch")]
        Commands::Watch {
            expand,
            batch_size,
            method,
        } => ctxsync::flows::session::run_watch(
            &root,
            settings,
            saved,
            &expand,
            ctxsync::flows::session::AggregationOptions {
                batch: BatchOptions::new(batch_size),
                method,
            },
            render_config,
        ),
    }
}
