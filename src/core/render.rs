//! Renderer module
//!
//! - Directory structure text (`render_structure`)
//! - Notification streams in jsonl, json, md and raw formats

use serde::Serialize;

use crate::core::events::Notification;
use crate::core::replace::Replacer;
use crate::core::tree::{FileTree, NodeId};

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Jsonl,
    Json,
    Markdown,
    Raw,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "jsonl" => Ok(OutputFormat::Jsonl),
            "json" => Ok(OutputFormat::Json),
            "md" | "markdown" => Ok(OutputFormat::Markdown),
            "raw" => Ok(OutputFormat::Raw),
            _ => Err(format!("Unknown format: {}", s)),
        }
    }
}

/// Render configuration combining format and options
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderConfig {
    pub format: OutputFormat,
    pub pretty: bool,
}

impl RenderConfig {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            pretty: false,
        }
    }

    pub fn with_pretty(format: OutputFormat, pretty: bool) -> Self {
        Self { format, pretty }
    }
}

/// Renderer for notification streams
pub struct Renderer {
    config: RenderConfig,
}

impl Renderer {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            config: RenderConfig::new(format),
        }
    }

    pub fn with_config(config: RenderConfig) -> Self {
        Self { config }
    }

    /// Render a batch of notifications to a string
    pub fn render(&self, notifications: &[Notification]) -> String {
        match self.config.format {
            OutputFormat::Jsonl => notifications
                .iter()
                .map(|n| self.render_one(n))
                .collect::<Vec<_>>()
                .join(self.separator()),
            OutputFormat::Json => self.to_json(notifications).unwrap_or_else(|| "[]".to_string()),
            OutputFormat::Markdown | OutputFormat::Raw => notifications
                .iter()
                .map(|n| self.render_one(n))
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Render a single notification, for streaming output
    pub fn render_one(&self, notification: &Notification) -> String {
        match self.config.format {
            OutputFormat::Jsonl | OutputFormat::Json => {
                self.to_json(notification).unwrap_or_default()
            }
            OutputFormat::Markdown => render_markdown(notification),
            OutputFormat::Raw => render_raw(notification),
        }
    }

    fn separator(&self) -> &'static str {
        if self.config.pretty {
            "\n\n"
        } else {
            "\n"
        }
    }

    fn to_json<T: Serialize + ?Sized>(&self, value: &T) -> Option<String> {
        if self.config.pretty {
            serde_json::to_string_pretty(value).ok()
        } else {
            serde_json::to_string(value).ok()
        }
    }
}

fn render_markdown(notification: &Notification) -> String {
    match notification {
        Notification::TreeUpdated { path, node } => format!(
            "- **tree-updated** `{}` ({} children)\n",
            path.display(),
            node.children().len()
        ),
        Notification::SelectionChanged { path, selected } => format!(
            "- **selection-changed** `{}` → {}\n",
            path.display(),
            if *selected { "selected" } else { "deselected" }
        ),
        Notification::ContentCleared => "- **content-cleared**\n".to_string(),
        Notification::ContentAdded { files } => {
            let mut out = String::new();
            for file in files {
                out.push_str(&format!("### `{}`\n\n", file.path.display()));
                out.push_str(&file.to_fenced());
                out.push_str("\n\n");
            }
            out
        }
        Notification::DirectoryTreeSet { text } => {
            format!("## Directory Structure\n\n```\n{}\n```\n", text)
        }
        Notification::TokenCountSet { count } => format!("> Tokens: {}\n", count),
    }
}

fn render_raw(notification: &Notification) -> String {
    match notification {
        Notification::ContentAdded { files } => files
            .iter()
            .map(|f| f.to_fenced())
            .collect::<Vec<_>>()
            .join("\n\n"),
        Notification::DirectoryTreeSet { text } => text.clone(),
        Notification::TokenCountSet { count } => count.to_string(),
        _ => String::new(),
    }
}

/// Render the directory structure of `tree`.
///
/// Pre-order, `├──`/`└──` prefixes, four spaces of indentation per level.
/// With `selected_only`, a line is printed only for nodes whose own
/// `selected` is true, but directories are always descended into so that
/// selected descendants still show up. Names pass through `replacer`.
pub fn render_structure(tree: &FileTree, selected_only: bool, replacer: &Replacer) -> String {
    let root = tree.root();
    let Some(root_node) = tree.node(root) else {
        return String::new();
    };

    let mut lines = vec![format!("{}/", replacer.apply(&root_node.name))];
    render_children(tree, root, 0, selected_only, replacer, &mut lines);
    lines.join("\n")
}

fn render_children(
    tree: &FileTree,
    dir: NodeId,
    depth: usize,
    selected_only: bool,
    replacer: &Replacer,
    lines: &mut Vec<String>,
) {
    let Some(node) = tree.node(dir) else {
        return;
    };
    let visible: Vec<NodeId> = node
        .children()
        .iter()
        .copied()
        .filter(|&c| tree.node(c).is_some_and(|n| !selected_only || n.selected))
        .collect();
    let last_visible = visible.last().copied();

    for &child_id in node.children() {
        let Some(child) = tree.node(child_id) else {
            continue;
        };
        if visible.contains(&child_id) {
            let branch = if Some(child_id) == last_visible {
                "└── "
            } else {
                "├── "
            };
            let suffix = if child.is_dir() { "/" } else { "" };
            lines.push(format!(
                "{}{}{}{}",
                "    ".repeat(depth),
                branch,
                replacer.apply(&child.name),
                suffix
            ));
        }
        if child.is_dir() {
            render_children(tree, child_id, depth + 1, selected_only, replacer, lines);
        }
    }
}
