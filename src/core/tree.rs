//! Indexed file tree
//!
//! The live tree is an arena: nodes live in a slot vector, a path index maps
//! each absolute path to its slot, and parent/children links are slot ids.
//! Every structural mutation goes through `FileTree` so the index can never
//! drift from the node set.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::core::error::{Result, SyncError};
use crate::core::model::{FileNode, NodeKind};

/// Handle to a node inside a `FileTree`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// A node stored in the arena
#[derive(Debug, Clone)]
pub struct TreeNode {
    pub name: String,
    pub path: PathBuf,
    pub kind: NodeKind,
    pub selected: bool,
    pub expanded: bool,
    pub last_synced: Option<DateTime<Utc>>,
    pub content: Option<String>,
    parent: Option<NodeId>,
    /// `None` for files
    children: Option<Vec<NodeId>>,
}

impl TreeNode {
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        self.children.as_deref().unwrap_or_default()
    }

    pub fn has_children_list(&self) -> bool {
        self.children.is_some()
    }
}

/// The live tree for one root
#[derive(Debug, Clone)]
pub struct FileTree {
    slots: Vec<Option<TreeNode>>,
    index: HashMap<PathBuf, NodeId>,
    root: NodeId,
}

impl FileTree {
    /// Create a tree holding only a root directory
    pub fn new_root(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let root = TreeNode {
            name: name.into(),
            path: path.clone(),
            kind: NodeKind::Directory,
            selected: false,
            expanded: true,
            last_synced: None,
            content: None,
            parent: None,
            children: Some(Vec::new()),
        };
        let mut index = HashMap::new();
        index.insert(path, NodeId(0));
        Self {
            slots: vec![Some(root)],
            index,
            root: NodeId(0),
        }
    }

    /// Build an arena from a nested tree.
    ///
    /// The root must be a directory and every path must be unique.
    pub fn from_node(node: &FileNode) -> Result<Self> {
        if !node.is_dir() {
            return Err(SyncError::Validation(format!(
                "tree root {} is not a directory",
                node.path.display()
            )));
        }
        let mut tree = Self::new_root(node.name.clone(), node.path.clone());
        let root = tree.root;
        if let Some(slot) = tree.node_mut(root) {
            slot.selected = node.selected;
            slot.expanded = node.expanded;
            slot.last_synced = node.last_synced;
        }
        for child in node.children() {
            tree.insert_child(root, child.clone())?;
        }
        Ok(tree)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn root_path(&self) -> &Path {
        self.node(self.root)
            .map(|n| n.path.as_path())
            .unwrap_or_else(|| Path::new(""))
    }

    /// Number of live nodes
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Option<&TreeNode> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut TreeNode> {
        self.slots.get_mut(id.0).and_then(Option::as_mut)
    }

    pub fn id_of(&self, path: &Path) -> Option<NodeId> {
        self.index.get(path).copied()
    }

    pub fn get(&self, path: &Path) -> Option<&TreeNode> {
        self.id_of(path).and_then(|id| self.node(id))
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.index.contains_key(path)
    }

    /// Child of `parent` with the given basename
    pub fn child_named(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        let parent = self.node(parent)?;
        parent
            .children()
            .iter()
            .copied()
            .find(|&c| self.node(c).is_some_and(|n| n.name == name))
    }

    /// Append `node` (and its whole subtree) to `parent`'s children.
    ///
    /// Fails if `parent` is not a directory or any path already exists.
    pub fn insert_child(&mut self, parent: NodeId, node: FileNode) -> Result<NodeId> {
        match self.node(parent) {
            Some(p) if p.has_children_list() => {}
            Some(p) => {
                return Err(SyncError::Validation(format!(
                    "{} cannot hold children",
                    p.path.display()
                )))
            }
            None => return Err(SyncError::Validation("unknown parent node".to_string())),
        }
        if self.index.contains_key(&node.path) {
            return Err(SyncError::DuplicatePath(node.path));
        }

        let id = NodeId(self.slots.len());
        let FileNode {
            name,
            path,
            kind,
            selected,
            expanded,
            children,
            last_synced,
            content,
        } = node;

        let children_list = match kind {
            NodeKind::Directory => Some(Vec::new()),
            NodeKind::File => None,
        };
        self.slots.push(Some(TreeNode {
            name,
            path: path.clone(),
            kind,
            selected,
            expanded,
            last_synced,
            content,
            parent: Some(parent),
            children: children_list,
        }));
        self.index.insert(path, id);
        if let Some(list) = self.node_mut(parent).and_then(|p| p.children.as_mut()) {
            list.push(id);
        }

        if kind.is_dir() {
            for child in children.unwrap_or_default() {
                self.insert_child(id, child)?;
            }
        }
        Ok(id)
    }

    /// Detach a node and its subtree. The root cannot be removed.
    pub fn remove(&mut self, id: NodeId) -> Option<FileNode> {
        if id == self.root {
            return None;
        }
        let snapshot = self.snapshot(id)?;
        let parent = self.node(id).and_then(TreeNode::parent);

        for sub in self.pre_order(id) {
            if let Some(slot) = self.slots.get_mut(sub.0).and_then(Option::take) {
                self.index.remove(&slot.path);
            }
        }
        if let Some(list) = parent
            .and_then(|p| self.node_mut(p))
            .and_then(|p| p.children.as_mut())
        {
            list.retain(|&c| c != id);
        }
        Some(snapshot)
    }

    /// Ids of `id` and all its descendants, pre-order
    pub fn pre_order(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.node(current) else {
                continue;
            };
            out.push(current);
            for &child in node.children().iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    /// Ancestors of `id`, nearest first
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.node(id).and_then(TreeNode::parent);
        while let Some(p) = current {
            out.push(p);
            current = self.node(p).and_then(TreeNode::parent);
        }
        out
    }

    /// Nested copy of the subtree rooted at `id`
    pub fn snapshot(&self, id: NodeId) -> Option<FileNode> {
        let node = self.node(id)?;
        let children = node.children.as_ref().map(|list| {
            list.iter()
                .filter_map(|&c| self.snapshot(c))
                .collect::<Vec<_>>()
        });
        Some(FileNode {
            name: node.name.clone(),
            path: node.path.clone(),
            kind: node.kind,
            selected: node.selected,
            expanded: node.expanded,
            children,
            last_synced: node.last_synced,
            content: node.content.clone(),
        })
    }

    /// Nested copy of the whole tree
    pub fn to_node(&self) -> FileNode {
        self.snapshot(self.root)
            .unwrap_or_else(|| FileNode::directory("", PathBuf::new()))
    }
}
