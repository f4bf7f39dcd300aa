//! Content aggregation
//!
//! Reads selected files, applies replace rules and emits fenced blocks,
//! either as one string or as fixed-size batches of `FileContent`.
//! A file that cannot be read is logged and skipped; the rest continue.

use anyhow::Context;
use std::ops::ControlFlow;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::core::events::Notification;
use crate::core::file_reader::{read_text, FileReadConfig};
use crate::core::model::{FileContent, FileNode};
use crate::core::paths::basename;
use crate::core::render::{render_structure, OutputFormat, RenderConfig, Renderer};
use crate::core::replace::Replacer;
use crate::core::settings::{BatchOptions, CompiledSettings, SyncSettings};
use crate::core::tokenizer::{estimate, stream_estimate, EstimateMethod, TokenCounter};
use crate::core::tree::FileTree;
use crate::flows::selection::{flatten_selected_files, open_tree};

/// Read one file and apply replacements. `None` if it could not be read.
pub fn read_file_content(
    path: &Path,
    name: &str,
    replacer: &Replacer,
    config: &FileReadConfig,
) -> Option<FileContent> {
    match read_text(path, config) {
        Ok(text) => Some(FileContent {
            path: path.to_path_buf(),
            name: name.to_string(),
            content: replacer.apply(&text),
        }),
        Err(e) => {
            warn!("Skipping {}: {}", path.display(), e);
            None
        }
    }
}

/// Aggregate every selected file in traversal order into fenced blocks
pub fn get_content(tree: &FileTree, replacer: &Replacer, config: &FileReadConfig) -> String {
    tree.pre_order(tree.root())
        .into_iter()
        .filter_map(|id| tree.node(id))
        .filter(|n| !n.is_dir() && n.selected)
        .filter_map(|n| read_file_content(&n.path, &n.name, replacer, config))
        .map(|c| c.to_fenced())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Stream already-flattened files in fixed-size batches.
///
/// Batches follow `files` order and `on_batch` is called once per batch,
/// in order, even if every file in a batch was skipped. Returns the number
/// of batches delivered.
pub fn stream_get_content<F>(
    files: &[FileNode],
    replacer: &Replacer,
    config: &FileReadConfig,
    options: BatchOptions,
    mut on_batch: F,
) -> usize
where
    F: FnMut(Vec<FileContent>),
{
    stream_get_content_until(files, replacer, config, options, |batch| {
        on_batch(batch);
        ControlFlow::Continue(())
    })
}

/// Like `stream_get_content`, but stops reading once `on_batch` breaks
pub fn stream_get_content_until<F>(
    files: &[FileNode],
    replacer: &Replacer,
    config: &FileReadConfig,
    options: BatchOptions,
    mut on_batch: F,
) -> usize
where
    F: FnMut(Vec<FileContent>) -> ControlFlow<()>,
{
    let mut batches = 0;
    for chunk in files.chunks(options.size.max(1)) {
        let batch = read_batch(chunk, replacer, config);
        debug!("Content batch {}: {} of {} files", batches, batch.len(), chunk.len());
        batches += 1;
        if on_batch(batch).is_break() {
            break;
        }
    }
    batches
}

/// One full re-aggregation of the selected files, detached from the live tree.
///
/// `run` emits `content-cleared`, then `directory-tree-set`, then one
/// `content-added` and one `token-count-set` per batch. Token counts are
/// running totals.
#[derive(Debug, Clone)]
pub struct AggregationJob {
    pub structure: String,
    pub files: Vec<FileNode>,
    pub replacer: Replacer,
    pub read_config: FileReadConfig,
    pub options: BatchOptions,
    pub method: EstimateMethod,
}

impl AggregationJob {
    /// Capture the current selection of `tree`
    pub fn from_tree(tree: &FileTree, settings: &CompiledSettings) -> Self {
        Self {
            structure: render_structure(tree, true, &settings.replacer),
            files: flatten_selected_files(tree),
            replacer: settings.replacer.clone(),
            read_config: FileReadConfig::default(),
            options: BatchOptions::default(),
            method: EstimateMethod::default(),
        }
    }

    pub fn with_options(mut self, options: BatchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_method(mut self, method: EstimateMethod) -> Self {
        self.method = method;
        self
    }

    /// Emit the whole sequence. `emit` returns false to stop early.
    ///
    /// Returns the final token total.
    pub fn run<F>(self, mut emit: F) -> usize
    where
        F: FnMut(Notification) -> bool,
    {
        let mut counter = TokenCounter::new();
        if !emit(Notification::ContentCleared) {
            return 0;
        }
        if !emit(Notification::DirectoryTreeSet {
            text: self.structure,
        }) {
            return 0;
        }

        let method = self.method;
        let batches = stream_get_content_until(
            &self.files,
            &self.replacer,
            &self.read_config,
            self.options,
            |files| {
                let tokens: usize = files.iter().map(|f| estimate(&f.content, method)).sum();
                if !emit(Notification::ContentAdded { files }) {
                    return ControlFlow::Break(());
                }
                let count = counter.add(tokens);
                if emit(Notification::TokenCountSet { count }) {
                    ControlFlow::Continue(())
                } else {
                    ControlFlow::Break(())
                }
            },
        );

        info!(
            "Aggregated {} files in {} batches, {} tokens",
            self.files.len(),
            batches,
            counter.total()
        );
        counter.total()
    }
}

#[cfg(not(feature = "parallel"))]
fn read_batch(chunk: &[FileNode], replacer: &Replacer, config: &FileReadConfig) -> Vec<FileContent> {
    chunk
        .iter()
        .filter(|n| !n.is_dir())
        .filter_map(|n| read_file_content(&n.path, &display_name(n), replacer, config))
        .collect()
}

#[cfg(feature = "parallel")]
fn read_batch(chunk: &[FileNode], replacer: &Replacer, config: &FileReadConfig) -> Vec<FileContent> {
    use rayon::prelude::*;

    chunk
        .par_iter()
        .filter(|n| !n.is_dir())
        .filter_map(|n| read_file_content(&n.path, &display_name(n), replacer, config))
        .collect()
}

fn display_name(node: &FileNode) -> String {
    if node.name.is_empty() {
        basename(&node.path)
    } else {
        node.name.clone()
    }
}

/// Print the aggregated content of the selection
pub fn run_content(
    root: &Path,
    settings: &SyncSettings,
    saved: Option<&Path>,
    stream: bool,
    options: BatchOptions,
    method: EstimateMethod,
    config: RenderConfig,
) -> anyhow::Result<()> {
    let tree = open_tree(root, settings, saved)
        .with_context(|| format!("Failed to scan {}", root.display()))?;
    let compiled = settings.compile(root);

    if !stream && config.format == OutputFormat::Raw {
        println!(
            "{}",
            get_content(&tree, &compiled.replacer, &FileReadConfig::default())
        );
        return Ok(());
    }

    let renderer = Renderer::with_config(config);
    let job = AggregationJob::from_tree(&tree, &compiled)
        .with_options(options)
        .with_method(method);

    if stream {
        job.run(|n| {
            let line = renderer.render_one(&n);
            if !line.is_empty() {
                println!("{}", line);
            }
            true
        });
    } else {
        let mut all = Vec::new();
        job.run(|n| {
            all.push(n);
            true
        });
        println!("{}", renderer.render(&all));
    }
    Ok(())
}

/// Print the token estimate of the selection
pub fn run_tokens(
    root: &Path,
    settings: &SyncSettings,
    saved: Option<&Path>,
    method: EstimateMethod,
    config: RenderConfig,
) -> anyhow::Result<()> {
    let tree = open_tree(root, settings, saved)
        .with_context(|| format!("Failed to scan {}", root.display()))?;
    let replacer = Replacer::new(&settings.replace_rules);
    let read_config = FileReadConfig::default();

    let files: Vec<FileNode> = flatten_selected_files(&tree)
        .into_iter()
        .filter_map(|node| {
            let content = read_file_content(&node.path, &node.name, &replacer, &read_config)?;
            Some(node.with_content(content.content))
        })
        .collect();

    let mut running = TokenCounter::new();
    let total = stream_estimate(&files, method, BatchOptions::default(), |tokens| {
        debug!("Running token total: {}", running.add(tokens));
    });
    info!("{} files, {} tokens ({})", files.len(), total, method);

    let output = Renderer::with_config(config).render(&[Notification::TokenCountSet { count: total }]);
    println!("{}", output);
    Ok(())
}
