//! Tree building
//!
//! Synchronous recursive scan with walkdir. Children keep the filesystem's
//! enumeration order. Any unreadable entry aborts the whole build: callers
//! get either a complete tree or an error, never a partial tree.

use chrono::Utc;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::core::error::{Result, SyncError};
use crate::core::file_reader::{read_text, FileReadConfig, ReadError};
use crate::core::model::FileNode;
use crate::core::paths::basename;
use crate::core::settings::{CompiledSettings, SyncSettings};
use crate::core::tree::{FileTree, NodeId};

use super::exclude::ExcludeSet;

/// Scan `root` into a tree. Every included node starts selected.
pub fn build_tree(root: &Path, settings: &SyncSettings) -> Result<FileTree> {
    scan(root, &settings.compile(root), None)
}

/// Like `build_tree`, but also reads every file and applies replace rules
pub fn build_tree_with_content(root: &Path, settings: &SyncSettings) -> Result<FileTree> {
    scan(root, &settings.compile(root), Some(&FileReadConfig::default()))
}

fn scan(
    root: &Path,
    compiled: &CompiledSettings,
    read_config: Option<&FileReadConfig>,
) -> Result<FileTree> {
    let meta = fs::metadata(root).map_err(|e| SyncError::fs(root, e))?;
    if !meta.is_dir() {
        return Err(SyncError::fs(
            root,
            std::io::Error::other("root is not a directory"),
        ));
    }

    let mut tree = FileTree::new_root(basename(root), root);
    let root_id = tree.root();
    if let Some(node) = tree.node_mut(root_id) {
        node.selected = true;
    }

    let excludes = &compiled.excludes;
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !excludes.should_exclude(&e.file_name().to_string_lossy()));

    for entry in walker {
        let entry = entry?;
        if entry.depth() == 0 {
            continue;
        }

        let path = entry.path();
        let Some(parent) = path.parent().and_then(|p| tree.id_of(p)) else {
            debug!("Parent of {} not in tree, skipping", path.display());
            continue;
        };

        let name = entry.file_name().to_string_lossy().to_string();
        let node = if entry.file_type().is_dir() {
            FileNode::directory(name, path)
        } else {
            let mut node = FileNode::file(name, path);
            if let Some(config) = read_config {
                match read_text(path, config) {
                    Ok(text) => {
                        node.content = Some(compiled.replacer.apply(&text));
                        node.last_synced = Some(Utc::now());
                    }
                    Err(ReadError::Io(e)) => return Err(SyncError::fs(path, e)),
                    Err(e) => warn!("Not reading {}: {}", path.display(), e),
                }
            }
            node
        };
        tree.insert_child(parent, node.with_selected(true))?;
    }

    info!("Scanned {} ({} nodes)", root.display(), tree.len());
    Ok(tree)
}

/// Load one level of `dir` from disk into the tree.
///
/// Entries already present are left alone. New entries start unselected and
/// collapsed; subdirectories get an empty children list. Returns the number
/// of nodes added.
pub fn populate_directory(tree: &mut FileTree, dir: NodeId, excludes: &ExcludeSet) -> Result<usize> {
    let Some(path) = tree.node(dir).filter(|n| n.is_dir()).map(|n| n.path.clone()) else {
        return Ok(0);
    };

    let mut added = 0;
    let entries = fs::read_dir(&path).map_err(|e| SyncError::fs(&path, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| SyncError::fs(&path, e))?;
        let name = entry.file_name().to_string_lossy().to_string();
        if excludes.should_exclude(&name) {
            continue;
        }
        let child_path = entry.path();
        if tree.contains(&child_path) {
            continue;
        }
        let is_dir = entry
            .file_type()
            .map_err(|e| SyncError::fs(&child_path, e))?
            .is_dir();
        let node = if is_dir {
            FileNode::directory(name, child_path)
        } else {
            FileNode::file(name, child_path)
        };
        tree.insert_child(dir, node)?;
        added += 1;
    }
    Ok(added)
}
