//! Selection state: reconciliation with a saved tree and toggling
//!
//! A toggle cascades down to every descendant of the target, then every
//! ancestor is recomputed as the OR of its children.

use anyhow::Context;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::backends::scan::build_tree;
use crate::core::error::{Result, SyncError};
use crate::core::events::Notification;
use crate::core::model::FileNode;
use crate::core::render::{render_structure, RenderConfig, Renderer};
use crate::core::replace::Replacer;
use crate::core::settings::SyncSettings;
use crate::core::tree::{FileTree, NodeId};

/// What survives from a saved node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavedState {
    pub selected: bool,
    pub last_synced: Option<DateTime<Utc>>,
}

/// Path-keyed view of a saved tree
pub type SavedIndex = HashMap<PathBuf, SavedState>;

/// Index a saved tree by path (pre-order; a repeated path keeps the last one)
pub fn build_index(saved: &FileNode) -> SavedIndex {
    saved
        .walk()
        .into_iter()
        .map(|node| {
            (
                node.path.clone(),
                SavedState {
                    selected: node.selected,
                    last_synced: node.last_synced,
                },
            )
        })
        .collect()
}

/// Copy selection and sync time from `saved` onto a freshly built tree.
///
/// The fresh tree's structure always wins. Paths not in `saved` end up
/// unselected with no sync time.
pub fn reconcile(tree: &mut FileTree, saved: &SavedIndex) {
    let ids = tree.pre_order(tree.root());
    let mut restored = 0usize;
    for id in ids {
        let Some(node) = tree.node_mut(id) else {
            continue;
        };
        match saved.get(&node.path) {
            Some(state) => {
                node.selected = state.selected;
                node.last_synced = state.last_synced;
                restored += 1;
            }
            None => {
                node.selected = false;
                node.last_synced = None;
            }
        }
    }
    debug!("Reconciled {} of {} nodes from saved state", restored, tree.len());
}

/// Read a previously saved tree. Missing or malformed files yield `None`.
pub fn load_saved_tree(path: &Path) -> Option<FileNode> {
    match try_load_saved_tree(path) {
        Ok(node) => Some(node),
        Err(e) => {
            warn!("Ignoring saved tree: {}", e);
            None
        }
    }
}

/// Strict form of `load_saved_tree`
pub fn try_load_saved_tree(path: &Path) -> Result<FileNode> {
    let content = fs::read_to_string(path).map_err(|e| SyncError::fs(path, e))?;
    serde_json::from_str(&content)
        .map_err(|e| SyncError::Validation(format!("{}: {}", path.display(), e)))
}

/// Set `target` and its descendants to `selected`, then recompute ancestors.
///
/// Returns false (and changes nothing) if `target` is not in the tree.
pub fn toggle_selection(tree: &mut FileTree, target: &Path, selected: bool) -> bool {
    let Some(id) = tree.id_of(target) else {
        debug!("Toggle target {} not in tree", target.display());
        return false;
    };

    for sub in tree.pre_order(id) {
        if let Some(node) = tree.node_mut(sub) {
            node.selected = selected;
        }
    }
    recompute_ancestors(tree, id);
    true
}

/// Deselect everything
pub fn reset_selection(tree: &mut FileTree) {
    let root = tree.root_path().to_path_buf();
    toggle_selection(tree, &root, false);
}

/// Recompute every ancestor of `id` as the OR of its children, nearest first
pub fn recompute_ancestors(tree: &mut FileTree, id: NodeId) {
    for ancestor in tree.ancestors(id) {
        let any = tree.node(ancestor).is_some_and(|n| {
            n.children()
                .iter()
                .any(|&c| tree.node(c).is_some_and(|child| child.selected))
        });
        if let Some(node) = tree.node_mut(ancestor) {
            node.selected = any;
        }
    }
}

/// Selected file nodes in pre-order (the flatten order used for streaming)
pub fn flatten_selected_files(tree: &FileTree) -> Vec<FileNode> {
    tree.pre_order(tree.root())
        .into_iter()
        .filter_map(|id| tree.node(id).map(|n| (id, n)))
        .filter(|(_, n)| !n.is_dir() && n.selected)
        .filter_map(|(id, _)| tree.snapshot(id))
        .collect()
}

/// Scan `root` and restore selection from a saved tree, if one is given
pub fn open_tree(root: &Path, settings: &SyncSettings, saved: Option<&Path>) -> Result<FileTree> {
    let mut tree = build_tree(root, settings)?;
    if let Some(saved) = saved.and_then(load_saved_tree) {
        reconcile(&mut tree, &build_index(&saved));
    }
    Ok(tree)
}

/// Print the directory structure
pub fn run_tree(
    root: &Path,
    settings: &SyncSettings,
    saved: Option<&Path>,
    all: bool,
    config: RenderConfig,
) -> anyhow::Result<()> {
    let tree = open_tree(root, settings, saved)
        .with_context(|| format!("Failed to scan {}", root.display()))?;
    let text = render_structure(&tree, !all, &Replacer::new(&settings.replace_rules));
    let output = Renderer::with_config(config).render(&[Notification::DirectoryTreeSet { text }]);
    println!("{}", output);
    Ok(())
}

/// Print the tree in its persistable form
pub fn run_snapshot(
    root: &Path,
    settings: &SyncSettings,
    saved: Option<&Path>,
    config: RenderConfig,
) -> anyhow::Result<()> {
    let tree = open_tree(root, settings, saved)
        .with_context(|| format!("Failed to scan {}", root.display()))?;
    let node = tree.to_node();
    let json = if config.pretty {
        serde_json::to_string_pretty(&node)?
    } else {
        serde_json::to_string(&node)?
    };
    println!("{}", json);
    Ok(())
}

/// Panics unless every non-empty directory is the OR of its children
#[cfg(test)]
pub(crate) fn assert_or_invariant(tree: &FileTree) {
    for id in tree.pre_order(tree.root()) {
        let Some(node) = tree.node(id) else {
            continue;
        };
        if node.is_dir() && !node.children().is_empty() {
            let any = node
                .children()
                .iter()
                .any(|&c| tree.node(c).is_some_and(|child| child.selected));
            assert_eq!(node.selected, any, "invariant broken at {}", node.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FileNode {
        FileNode::directory("r", "/r")
            .with_selected(true)
            .with_child(FileNode::file("a", "/r/a").with_selected(true))
            .with_child(
                FileNode::directory("d", "/r/d")
                    .with_selected(true)
                    .with_child(FileNode::file("x", "/r/d/x").with_selected(true))
                    .with_child(
                        FileNode::directory("e", "/r/d/e")
                            .with_selected(true)
                            .with_child(FileNode::file("y", "/r/d/e/y").with_selected(true)),
                    ),
            )
    }

    /// Every directory with children equals the OR of its children
    fn selected(tree: &FileTree, path: &str) -> bool {
        tree.get(Path::new(path)).unwrap().selected
    }

    #[test]
    fn test_toggle_file_updates_ancestors() {
        let mut tree = FileTree::from_node(&sample()).unwrap();
        assert!(toggle_selection(&mut tree, Path::new("/r/d/e/y"), false));

        assert!(!selected(&tree, "/r/d/e/y"));
        assert!(!selected(&tree, "/r/d/e"));
        assert!(selected(&tree, "/r/d"));
        assert!(selected(&tree, "/r"));
        assert_or_invariant(&tree);
    }

    #[test]
    fn test_toggle_directory_cascades_down() {
        let mut tree = FileTree::from_node(&sample()).unwrap();
        assert!(toggle_selection(&mut tree, Path::new("/r/d"), false));

        assert!(!selected(&tree, "/r/d/x"));
        assert!(!selected(&tree, "/r/d/e/y"));
        assert!(selected(&tree, "/r"));
        assert_or_invariant(&tree);

        assert!(toggle_selection(&mut tree, Path::new("/r/a"), false));
        assert!(!selected(&tree, "/r"));
        assert_or_invariant(&tree);
    }

    #[test]
    fn test_toggle_on_reselects_ancestors() {
        let mut tree = FileTree::from_node(&sample()).unwrap();
        reset_selection(&mut tree);
        assert!(!selected(&tree, "/r"));

        assert!(toggle_selection(&mut tree, Path::new("/r/d/e/y"), true));
        assert!(selected(&tree, "/r/d/e"));
        assert!(selected(&tree, "/r/d"));
        assert!(selected(&tree, "/r"));
        assert!(!selected(&tree, "/r/d/x"));
        assert_or_invariant(&tree);
    }

    #[test]
    fn test_toggle_unknown_path_is_noop() {
        let mut tree = FileTree::from_node(&sample()).unwrap();
        assert!(!toggle_selection(&mut tree, Path::new("/r/missing"), false));
        assert!(selected(&tree, "/r/a"));
    }

    #[test]
    fn test_reset_selection() {
        let mut tree = FileTree::from_node(&sample()).unwrap();
        reset_selection(&mut tree);
        for id in tree.pre_order(tree.root()) {
            assert!(!tree.node(id).unwrap().selected);
        }
    }

    #[test]
    fn test_build_index_last_wins() {
        let saved = FileNode::directory("r", "/r")
            .with_child(FileNode::file("a", "/r/a").with_selected(true))
            .with_child(FileNode::file("a", "/r/a").with_selected(false));
        let index = build_index(&saved);
        assert_eq!(index.len(), 2);
        assert!(!index[Path::new("/r/a")].selected);
    }

    #[test]
    fn test_reconcile_preserves_and_defaults() {
        let saved = FileNode::directory("r", "/r")
            .with_selected(true)
            .with_child(FileNode::file("a", "/r/a").with_selected(true))
            .with_child(FileNode::file("gone", "/r/gone").with_selected(true));

        let fresh = FileNode::directory("r", "/r")
            .with_selected(true)
            .with_child(FileNode::file("a", "/r/a").with_selected(true))
            .with_child(FileNode::file("new", "/r/new").with_selected(true));
        let mut tree = FileTree::from_node(&fresh).unwrap();

        reconcile(&mut tree, &build_index(&saved));

        assert!(selected(&tree, "/r"));
        assert!(selected(&tree, "/r/a"));
        assert!(!selected(&tree, "/r/new"));
        assert!(!tree.contains(Path::new("/r/gone")));
    }

    #[test]
    fn test_reconcile_fresh_structure_wins() {
        // saved says `d` was a file; the fresh scan says directory
        let saved = FileNode::directory("r", "/r")
            .with_child(FileNode::file("d", "/r/d").with_selected(true));
        let fresh = FileNode::directory("r", "/r")
            .with_child(FileNode::directory("d", "/r/d").with_child(FileNode::file("x", "/r/d/x")));
        let mut tree = FileTree::from_node(&fresh).unwrap();

        reconcile(&mut tree, &build_index(&saved));

        let d = tree.get(Path::new("/r/d")).unwrap();
        assert!(d.is_dir());
        assert!(d.selected);
        assert!(!selected(&tree, "/r/d/x"));
    }

    #[test]
    fn test_reconcile_copies_last_synced() {
        let when = Utc::now();
        let mut saved_a = FileNode::file("a", "/r/a");
        saved_a.last_synced = Some(when);
        let saved = FileNode::directory("r", "/r").with_child(saved_a);

        let fresh = FileNode::directory("r", "/r").with_child(FileNode::file("a", "/r/a"));
        let mut tree = FileTree::from_node(&fresh).unwrap();
        reconcile(&mut tree, &build_index(&saved));

        assert_eq!(tree.get(Path::new("/r/a")).unwrap().last_synced, Some(when));
    }

    #[test]
    fn test_load_saved_tree_malformed_is_none() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("state.json");
        fs::write(&path, "[1, 2").unwrap();
        assert!(load_saved_tree(&path).is_none());
        assert!(load_saved_tree(&temp.path().join("missing.json")).is_none());
    }

    #[test]
    fn test_load_saved_tree_valid() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("state.json");
        fs::write(&path, serde_json::to_string(&sample()).unwrap()).unwrap();
        assert_eq!(load_saved_tree(&path), Some(sample()));
    }

    #[test]
    fn test_open_tree_applies_saved_state() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("a.txt"), "a").unwrap();
        fs::write(temp.path().join("b.txt"), "b").unwrap();

        let saved = FileNode::directory("root", temp.path())
            .with_selected(true)
            .with_child(FileNode::file("a.txt", temp.path().join("a.txt")).with_selected(true));
        let state = temp.path().join("state.json");
        fs::write(&state, serde_json::to_string(&saved).unwrap()).unwrap();

        let settings = SyncSettings {
            exclude_patterns: vec!["state.json".to_string()],
            ..Default::default()
        };
        let tree = open_tree(temp.path(), &settings, Some(&state)).unwrap();
        assert!(tree.get(&temp.path().join("a.txt")).unwrap().selected);
        assert!(!tree.get(&temp.path().join("b.txt")).unwrap().selected);

        let fresh = open_tree(temp.path(), &settings, None).unwrap();
        assert!(fresh.get(&temp.path().join("b.txt")).unwrap().selected);
    }

    #[test]
    fn test_flatten_selected_files_pre_order() {
        let mut tree = FileTree::from_node(&sample()).unwrap();
        toggle_selection(&mut tree, Path::new("/r/d/x"), false);
        let paths: Vec<_> = flatten_selected_files(&tree)
            .into_iter()
            .map(|n| n.path)
            .collect();
        assert_eq!(paths, vec![PathBuf::from("/r/a"), PathBuf::from("/r/d/e/y")]);
    }
}
