//! Path utilities
//!
//! Tree paths are absolute; names shown to users use '/' separators.

use std::path::Path;

/// Normalize a path to use '/' as separator (for cross-platform consistency)
pub fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Final component of a path as a string, or the whole path when it has none
pub fn basename(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| normalize_path(path))
}

/// True if `path` is `root` or lies below it (lexically)
pub fn is_within(path: &Path, root: &Path) -> bool {
    path.starts_with(root)
}
