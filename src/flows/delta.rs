//! Delta engine
//!
//! Turns one filesystem change into one tree mutation. `DeltaEngine::apply`
//! is the single entry point: it mutates the tree in place and returns the
//! notifications to publish plus whether selected content must be
//! re-aggregated. The engine has no threads or channels of its own, so it
//! works the same under an event loop, a worker thread or an actor.
//!
//! Events under a parent that is unknown or not expanded are ignored.

use chrono::Utc;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::backends::scan::populate_directory;
use crate::core::events::Notification;
use crate::core::file_reader::FileReadConfig;
use crate::core::model::FileNode;
use crate::core::paths::basename;
use crate::core::settings::CompiledSettings;
use crate::core::tree::{FileTree, NodeId};
use crate::flows::content::read_file_content;
use crate::flows::selection::{recompute_ancestors, toggle_selection};

pub use crate::core::events::FsEvent;

/// What applying one event produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeltaOutcome {
    pub notifications: Vec<Notification>,
    /// Selected content must be recomputed
    pub reaggregate: bool,
    /// Expanded directories that left the tree; their subscriptions are stale
    pub unwatched: Vec<PathBuf>,
}

impl DeltaOutcome {
    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty() && !self.reaggregate && self.unwatched.is_empty()
    }
}

/// Applies filesystem deltas to a tree
#[derive(Debug, Clone, Default)]
pub struct DeltaEngine {
    expanded: HashSet<PathBuf>,
    read_config: FileReadConfig,
}

impl DeltaEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget every expanded directory
    pub fn clear(&mut self) {
        self.expanded.clear();
    }

    /// The root is always expanded
    pub fn is_expanded(&self, tree: &FileTree, path: &Path) -> bool {
        path == tree.root_path() || self.expanded.contains(path)
    }

    /// Mark `path` expanded. A directory with no loaded children is populated
    /// one level deep from disk.
    pub fn expand(
        &mut self,
        tree: &mut FileTree,
        path: &Path,
        settings: &CompiledSettings,
    ) -> DeltaOutcome {
        self.expanded.insert(path.to_path_buf());

        let Some(id) = tree.id_of(path).filter(|&id| tree.node(id).is_some_and(|n| n.is_dir()))
        else {
            debug!("Expanded {} which is not a loaded directory", path.display());
            return DeltaOutcome::default();
        };

        let needs_load = tree.node(id).is_some_and(|n| n.children().is_empty());
        if needs_load {
            if let Err(e) = populate_directory(tree, id, &settings.excludes) {
                warn!("Cannot load {}: {}", path.display(), e);
            }
        }
        if let Some(node) = tree.node_mut(id) {
            node.expanded = true;
        }

        DeltaOutcome {
            notifications: tree_updated(tree, id).into_iter().collect(),
            ..Default::default()
        }
    }

    /// Forget `path` as expanded. Returns whether it was expanded.
    pub fn collapse(&mut self, path: &Path) -> bool {
        self.expanded.remove(path)
    }

    /// Apply a single event to `tree`
    pub fn apply(
        &mut self,
        tree: &mut FileTree,
        event: &FsEvent,
        settings: &CompiledSettings,
    ) -> DeltaOutcome {
        if settings.excludes.excludes_path(event.path()) {
            debug!("Ignoring excluded {}", event.path().display());
            return DeltaOutcome::default();
        }

        match event {
            FsEvent::Add(path) => self.on_add(tree, path, is_dir_on_disk(path).unwrap_or(false)),
            FsEvent::AddDir(path) => self.on_add(tree, path, true),
            FsEvent::Unlink(path) | FsEvent::UnlinkDir(path) => self.on_unlink(tree, path),
            FsEvent::Change(path) => self.on_change(tree, path, settings),
        }
    }

    /// Parent of `path` if it is loaded, expanded and can hold children
    fn expanded_parent(&self, tree: &FileTree, path: &Path) -> Option<NodeId> {
        let parent_path = path.parent()?;
        let id = tree.id_of(parent_path)?;
        let node = tree.node(id)?;
        if node.has_children_list() && self.is_expanded(tree, parent_path) {
            Some(id)
        } else {
            None
        }
    }

    fn on_add(&mut self, tree: &mut FileTree, path: &Path, is_dir: bool) -> DeltaOutcome {
        let Some(parent) = self.expanded_parent(tree, path) else {
            debug!("Ignoring add of {} (parent not expanded)", path.display());
            return DeltaOutcome::default();
        };

        let mut outcome = DeltaOutcome::default();
        let name = basename(path);
        if let Some(existing) = tree.child_named(parent, &name) {
            self.remove_subtree(tree, existing, false, &mut outcome);
        }
        if let Some(existing) = tree.id_of(path) {
            self.remove_subtree(tree, existing, false, &mut outcome);
        }

        let node = if is_dir {
            FileNode::directory(name, path)
        } else {
            FileNode::file(name, path)
        };
        match tree.insert_child(parent, node) {
            Ok(id) => recompute_ancestors(tree, id),
            Err(e) => warn!("Cannot add {}: {}", path.display(), e),
        }

        outcome.notifications.extend(tree_updated(tree, parent));
        outcome
    }

    fn on_unlink(&mut self, tree: &mut FileTree, path: &Path) -> DeltaOutcome {
        let Some(parent) = self.expanded_parent(tree, path) else {
            debug!("Ignoring unlink of {} (parent not expanded)", path.display());
            return DeltaOutcome::default();
        };
        let name = basename(path);
        let Some(child) = tree.child_named(parent, &name) else {
            debug!("Ignoring unlink of unknown {}", path.display());
            return DeltaOutcome::default();
        };

        let mut outcome = DeltaOutcome::default();
        self.remove_subtree(tree, child, true, &mut outcome);
        outcome.reaggregate = true;
        outcome.notifications.extend(tree_updated(tree, parent));
        outcome
    }

    /// Drop `id` and forget every expanded directory beneath it. The subtree
    /// is deselected first when `always_deselect` is set or anything in it is
    /// selected.
    fn remove_subtree(
        &mut self,
        tree: &mut FileTree,
        id: NodeId,
        always_deselect: bool,
        outcome: &mut DeltaOutcome,
    ) {
        let ids = tree.pre_order(id);
        let any_selected = ids
            .iter()
            .any(|&sub| tree.node(sub).is_some_and(|n| n.selected));
        let Some(path) = tree.node(id).map(|n| n.path.clone()) else {
            return;
        };

        if (always_deselect || any_selected) && toggle_selection(tree, &path, false) {
            outcome.notifications.push(Notification::SelectionChanged {
                path: path.clone(),
                selected: false,
            });
            outcome.reaggregate = true;
        }

        let forgotten: Vec<PathBuf> = ids
            .into_iter()
            .filter_map(|sub| tree.node(sub).map(|n| n.path.clone()))
            .collect();
        tree.remove(id);
        for p in forgotten {
            if self.expanded.remove(&p) {
                outcome.unwatched.push(p);
            }
        }
    }

    fn on_change(
        &mut self,
        tree: &mut FileTree,
        path: &Path,
        settings: &CompiledSettings,
    ) -> DeltaOutcome {
        let Some(id) = tree.id_of(path) else {
            return DeltaOutcome::default();
        };
        let Some((name, selected, is_dir)) = tree
            .node(id)
            .map(|n| (n.name.clone(), n.selected, n.is_dir()))
        else {
            return DeltaOutcome::default();
        };
        if is_dir || !selected {
            return DeltaOutcome::default();
        }

        let mut notifications = Vec::new();
        if let Some(content) = read_file_content(path, &name, &settings.replacer, &self.read_config) {
            if let Some(node) = tree.node_mut(id) {
                node.content = Some(content.content.clone());
                node.last_synced = Some(Utc::now());
            }
            notifications.push(Notification::ContentAdded {
                files: vec![content],
            });
        }

        DeltaOutcome {
            notifications,
            reaggregate: true,
            ..Default::default()
        }
    }
}

fn tree_updated(tree: &FileTree, id: NodeId) -> Option<Notification> {
    let node = tree.snapshot(id)?;
    Some(Notification::TreeUpdated {
        path: node.path.clone(),
        node,
    })
}

fn is_dir_on_disk(path: &Path) -> Option<bool> {
    fs::metadata(path).ok().map(|m| m.is_dir())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::exclude::ExcludeSet;
    use crate::core::model::{FileContent, ReplaceRule};
    use crate::core::replace::Replacer;
    use crate::flows::selection::assert_or_invariant;
    use tempfile::{tempdir, TempDir};

    fn compiled() -> CompiledSettings {
        CompiledSettings::default()
    }

    /// root/{a.txt (selected), x/ (empty)}
    fn fixture() -> (TempDir, FileTree) {
        let temp = tempdir().unwrap();
        let root = temp.path();
        fs::write(root.join("a.txt"), "alpha").unwrap();
        fs::create_dir(root.join("x")).unwrap();

        let node = FileNode::directory("root", root)
            .with_selected(true)
            .with_child(FileNode::file("a.txt", root.join("a.txt")).with_selected(true))
            .with_child(FileNode::directory("x", root.join("x")));
        let tree = FileTree::from_node(&node).unwrap();
        (temp, tree)
    }

    fn children_of(tree: &FileTree, path: &Path) -> Vec<String> {
        let node = tree.get(path).unwrap();
        node.children()
            .iter()
            .map(|&c| tree.node(c).unwrap().name.clone())
            .collect()
    }

    #[test]
    fn test_add_under_expanded_dir() {
        let (temp, mut tree) = fixture();
        let mut engine = DeltaEngine::new();
        let x = temp.path().join("x");
        engine.expand(&mut tree, &x, &compiled());

        let new_file = x.join("new.txt");
        fs::write(&new_file, "n").unwrap();
        let outcome = engine.apply(&mut tree, &FsEvent::Add(new_file.clone()), &compiled());

        assert_eq!(children_of(&tree, &x), vec!["new.txt"]);
        let node = tree.get(&new_file).unwrap();
        assert!(!node.selected);
        assert!(!node.expanded);
        assert!(!node.has_children_list());
        assert!(!outcome.reaggregate);
        assert!(matches!(
            &outcome.notifications[..],
            [Notification::TreeUpdated { path, node }] if path == &x && node.children().len() == 1
        ));

        // a second add for the same name replaces rather than duplicates
        let outcome = engine.apply(&mut tree, &FsEvent::Add(new_file.clone()), &compiled());
        assert_eq!(children_of(&tree, &x), vec!["new.txt"]);
        assert!(!outcome.reaggregate);
        assert_eq!(outcome.notifications.len(), 1);
        assert_or_invariant(&tree);
    }

    #[test]
    fn test_add_over_selected_file_deselects_it() {
        let (temp, mut tree) = fixture();
        let mut engine = DeltaEngine::new();
        let a = temp.path().join("a.txt");

        let outcome = engine.apply(&mut tree, &FsEvent::Add(a.clone()), &compiled());

        assert!(!tree.get(&a).unwrap().selected);
        assert!(!tree.node(tree.root()).unwrap().selected);
        assert_or_invariant(&tree);
        assert!(outcome.reaggregate);
        assert_eq!(
            outcome.notifications[0],
            Notification::SelectionChanged {
                path: a,
                selected: false
            }
        );
        assert!(matches!(
            outcome.notifications[1],
            Notification::TreeUpdated { .. }
        ));
    }

    #[test]
    fn test_add_over_expanded_dir_drops_its_watch() {
        let (temp, mut tree) = fixture();
        let mut engine = DeltaEngine::new();
        let x = temp.path().join("x");
        fs::create_dir(x.join("inner")).unwrap();
        engine.expand(&mut tree, &x, &compiled());
        engine.expand(&mut tree, &x.join("inner"), &compiled());

        let outcome = engine.apply(&mut tree, &FsEvent::AddDir(x.clone()), &compiled());

        let mut unwatched = outcome.unwatched.clone();
        unwatched.sort();
        assert_eq!(unwatched, vec![x.clone(), x.join("inner")]);
        assert!(!engine.is_expanded(&tree, &x));
        assert!(tree.get(&x).unwrap().children().is_empty());
        assert_or_invariant(&tree);
    }

    #[test]
    fn test_add_under_collapsed_dir_is_ignored() {
        let (temp, mut tree) = fixture();
        let mut engine = DeltaEngine::new();
        let before = tree.len();

        let outcome = engine.apply(
            &mut tree,
            &FsEvent::Add(temp.path().join("x/new.txt")),
            &compiled(),
        );
        assert!(outcome.is_empty());
        assert_eq!(tree.len(), before);
    }

    #[test]
    fn test_add_with_unknown_parent_is_ignored() {
        let (temp, mut tree) = fixture();
        let mut engine = DeltaEngine::new();
        let outcome = engine.apply(
            &mut tree,
            &FsEvent::Add(temp.path().join("nope/deeper/file.txt")),
            &compiled(),
        );
        assert!(outcome.is_empty());
    }

    #[test]
    fn test_add_at_root_uses_stat_for_kind() {
        let (temp, mut tree) = fixture();
        let mut engine = DeltaEngine::new();
        let dir = temp.path().join("fresh");
        fs::create_dir(&dir).unwrap();

        engine.apply(&mut tree, &FsEvent::Add(dir.clone()), &compiled());
        let node = tree.get(&dir).unwrap();
        assert!(node.is_dir());
        assert!(node.children().is_empty());
    }

    #[test]
    fn test_add_dir_starts_empty_and_unexpanded() {
        let (temp, mut tree) = fixture();
        let mut engine = DeltaEngine::new();
        let dir = temp.path().join("made");

        engine.apply(&mut tree, &FsEvent::AddDir(dir.clone()), &compiled());
        let node = tree.get(&dir).unwrap();
        assert!(node.is_dir());
        assert!(!node.expanded);
        assert!(node.children().is_empty());
        assert_or_invariant(&tree);
    }

    #[test]
    fn test_excluded_event_is_ignored() {
        let (temp, mut tree) = fixture();
        let mut engine = DeltaEngine::new();
        let settings = CompiledSettings {
            excludes: ExcludeSet::compile(&["*.log"]),
            ..Default::default()
        };
        let outcome = engine.apply(
            &mut tree,
            &FsEvent::Add(temp.path().join("debug.log")),
            &settings,
        );
        assert!(outcome.is_empty());
        assert!(!tree.contains(&temp.path().join("debug.log")));
    }

    #[test]
    fn test_unlink_deselects_then_removes() {
        let (temp, mut tree) = fixture();
        let mut engine = DeltaEngine::new();
        let a = temp.path().join("a.txt");

        let outcome = engine.apply(&mut tree, &FsEvent::Unlink(a.clone()), &compiled());

        assert!(!tree.contains(&a));
        assert!(outcome.reaggregate);
        assert_eq!(
            outcome.notifications[0],
            Notification::SelectionChanged {
                path: a,
                selected: false
            }
        );
        assert!(matches!(
            outcome.notifications[1],
            Notification::TreeUpdated { .. }
        ));
        // root lost its only selected child
        assert!(!tree.node(tree.root()).unwrap().selected);
        assert_or_invariant(&tree);
    }

    #[test]
    fn test_unlink_in_mixed_selection_keeps_or_invariant() {
        let node = FileNode::directory("p", "/p")
            .with_selected(true)
            .with_child(
                FileNode::directory("x", "/p/x")
                    .with_selected(true)
                    .with_child(FileNode::file("sel.txt", "/p/x/sel.txt").with_selected(true))
                    .with_child(FileNode::file("unsel.txt", "/p/x/unsel.txt")),
            )
            .with_child(FileNode::file("b.txt", "/p/b.txt"));
        let mut tree = FileTree::from_node(&node).unwrap();
        let mut engine = DeltaEngine::new();
        let x = Path::new("/p/x");
        engine.expand(&mut tree, x, &compiled());

        let outcome = engine.apply(
            &mut tree,
            &FsEvent::Unlink(PathBuf::from("/p/x/sel.txt")),
            &compiled(),
        );

        assert!(outcome.reaggregate);
        assert_eq!(children_of(&tree, x), vec!["unsel.txt"]);
        assert!(!tree.get(x).unwrap().selected);
        assert!(!tree.node(tree.root()).unwrap().selected);
        assert_or_invariant(&tree);
    }

    #[test]
    fn test_unlink_dir_forgets_expanded_descendants() {
        let (temp, mut tree) = fixture();
        let mut engine = DeltaEngine::new();
        let x = temp.path().join("x");
        engine.expand(&mut tree, &x, &compiled());

        let outcome = engine.apply(&mut tree, &FsEvent::UnlinkDir(x.clone()), &compiled());
        assert!(outcome.reaggregate);
        assert_eq!(outcome.unwatched, vec![x.clone()]);
        assert!(!tree.contains(&x));
        assert!(!engine.is_expanded(&tree, &x));
        assert_or_invariant(&tree);
    }

    #[test]
    fn test_unlink_unknown_child_is_ignored() {
        let (temp, mut tree) = fixture();
        let mut engine = DeltaEngine::new();
        let outcome = engine.apply(
            &mut tree,
            &FsEvent::Unlink(temp.path().join("never.txt")),
            &compiled(),
        );
        assert!(outcome.is_empty());
    }

    #[test]
    fn test_change_selected_file_emits_content() {
        let (temp, mut tree) = fixture();
        let mut engine = DeltaEngine::new();
        let a = temp.path().join("a.txt");
        fs::write(&a, "secret alpha").unwrap();

        let settings = CompiledSettings {
            replacer: Replacer::new(&[ReplaceRule::new("secret", "REDACTED")]),
            ..Default::default()
        };
        let outcome = engine.apply(&mut tree, &FsEvent::Change(a.clone()), &settings);

        assert!(outcome.reaggregate);
        assert_eq!(
            outcome.notifications,
            vec![Notification::ContentAdded {
                files: vec![FileContent {
                    path: a.clone(),
                    name: "a.txt".to_string(),
                    content: "REDACTED alpha".to_string(),
                }]
            }]
        );
        let node = tree.get(&a).unwrap();
        assert!(node.last_synced.is_some());
        assert_eq!(node.content.as_deref(), Some("REDACTED alpha"));
    }

    #[test]
    fn test_change_unselected_file_is_ignored() {
        let (temp, mut tree) = fixture();
        let mut engine = DeltaEngine::new();
        let a = temp.path().join("a.txt");
        toggle_selection(&mut tree, &a, false);

        let outcome = engine.apply(&mut tree, &FsEvent::Change(a), &compiled());
        assert!(outcome.is_empty());
    }

    #[test]
    fn test_change_unreadable_file_still_reaggregates() {
        let (temp, mut tree) = fixture();
        let mut engine = DeltaEngine::new();
        let a = temp.path().join("a.txt");
        fs::remove_file(&a).unwrap();

        let outcome = engine.apply(&mut tree, &FsEvent::Change(a), &compiled());
        assert!(outcome.notifications.is_empty());
        assert!(outcome.reaggregate);
    }

    #[test]
    fn test_expand_populates_lazily() {
        let (temp, mut tree) = fixture();
        let mut engine = DeltaEngine::new();
        let x = temp.path().join("x");
        fs::write(x.join("late.txt"), "l").unwrap();

        let outcome = engine.expand(&mut tree, &x, &compiled());
        assert_eq!(children_of(&tree, &x), vec!["late.txt"]);
        assert!(tree.get(&x).unwrap().expanded);
        assert_eq!(outcome.notifications.len(), 1);

        // already loaded: not re-read
        fs::write(x.join("later.txt"), "l").unwrap();
        engine.expand(&mut tree, &x, &compiled());
        assert_eq!(children_of(&tree, &x), vec!["late.txt"]);
    }

    #[test]
    fn test_collapse_stops_patching() {
        let (temp, mut tree) = fixture();
        let mut engine = DeltaEngine::new();
        let x = temp.path().join("x");
        engine.expand(&mut tree, &x, &compiled());
        assert!(engine.collapse(&x));
        assert!(!engine.collapse(&x));

        let outcome = engine.apply(&mut tree, &FsEvent::AddDir(x.join("d")), &compiled());
        assert!(outcome.is_empty());
    }
}
