//! Data model
//!
//! `FileNode` is the nested, serializable shape of a tree: it is what gets
//! persisted between sessions and what is handed to collaborators in
//! notifications. The live, mutable tree is `crate::core::tree::FileTree`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Node type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Directory,
}

impl NodeKind {
    pub fn is_dir(self) -> bool {
        self == NodeKind::Directory
    }
}

/// A node of a file tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileNode {
    /// Basename
    pub name: String,

    /// Absolute path, unique within one tree
    pub path: PathBuf,

    #[serde(rename = "type")]
    pub kind: NodeKind,

    #[serde(default)]
    pub selected: bool,

    /// Children are only loaded once a directory is expanded
    #[serde(default)]
    pub expanded: bool,

    /// Children in filesystem enumeration order. Always `None` for files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<FileNode>>,

    /// Set only when content was read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl FileNode {
    /// Create a file node
    pub fn file(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            kind: NodeKind::File,
            selected: false,
            expanded: false,
            children: None,
            last_synced: None,
            content: None,
        }
    }

    /// Create a directory node with an empty children list
    pub fn directory(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            kind: NodeKind::Directory,
            selected: false,
            expanded: false,
            children: Some(Vec::new()),
            last_synced: None,
            content: None,
        }
    }

    pub fn with_selected(mut self, selected: bool) -> Self {
        self.selected = selected;
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Append a child (directories only; ignored for files)
    pub fn with_child(mut self, child: FileNode) -> Self {
        if let Some(children) = self.children.as_mut() {
            children.push(child);
        }
        self
    }

    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    pub fn children(&self) -> &[FileNode] {
        self.children.as_deref().unwrap_or_default()
    }

    /// Pre-order traversal
    pub fn walk(&self) -> Vec<&FileNode> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            out.push(node);
            for child in node.children().iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    /// Find a node by path (pre-order)
    pub fn find(&self, path: &std::path::Path) -> Option<&FileNode> {
        self.walk().into_iter().find(|n| n.path == path)
    }
}

/// A literal substitution applied to content and displayed names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaceRule {
    pub from: String,
    pub to: String,
}

impl ReplaceRule {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

impl std::str::FromStr for ReplaceRule {
    type Err = String;

    /// Parse `FROM=TO`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((from, to)) if !from.is_empty() => Ok(ReplaceRule::new(from, to)),
            _ => Err(format!("Invalid replace rule: {} (expected FROM=TO)", s)),
        }
    }
}

/// The unit of content streamed to consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
    pub path: PathBuf,
    pub name: String,
    pub content: String,
}

impl FileContent {
    /// Render as a fenced block labeled by file name
    pub fn to_fenced(&self) -> String {
        fenced_block(&self.name, &self.content)
    }
}

/// Fenced code block labeled by `label`
pub fn fenced_block(label: &str, content: &str) -> String {
    format!("```{}\n{}\n```", label, content)
}

/// Composite of streamed batches, keyed by path (last write wins)
#[derive(Debug, Clone, Default)]
pub struct ContentSet {
    items: BTreeMap<PathBuf, FileContent>,
}

impl ContentSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, batch: impl IntoIterator<Item = FileContent>) {
        for item in batch {
            self.items.insert(item.path.clone(), item);
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items in path order
    pub fn iter(&self) -> impl Iterator<Item = &FileContent> {
        self.items.values()
    }

    /// Fenced blocks in path order
    pub fn fenced_blocks(&self) -> Vec<String> {
        self.iter().map(FileContent::to_fenced).collect()
    }

    pub fn render(&self) -> String {
        self.fenced_blocks().join("\n\n")
    }
}
