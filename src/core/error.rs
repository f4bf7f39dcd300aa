//! Error types shared by the sync engine

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors surfaced by the sync engine
#[derive(Error, Debug)]
pub enum SyncError {
    /// A path could not be read while scanning. Aborts the whole build.
    #[error("Cannot read {}: {source}", .path.display())]
    FileSystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Settings or saved state could not be parsed
    #[error("Invalid data: {0}")]
    Validation(String),

    /// The same path appeared twice while building a tree
    #[error("Duplicate path in tree: {}", .0.display())]
    DuplicatePath(PathBuf),

    /// A watch subscription could not be opened or closed
    #[error("Watch error: {0}")]
    Watch(String),

    /// The watch service has already been disposed
    #[error("Watch service disposed")]
    Disposed,
}

impl SyncError {
    /// Wrap an io error together with the path that caused it
    pub fn fs(path: impl AsRef<Path>, source: io::Error) -> Self {
        SyncError::FileSystem {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<walkdir::Error> for SyncError {
    fn from(err: walkdir::Error) -> Self {
        let path = err.path().map(Path::to_path_buf).unwrap_or_default();
        let source = err
            .into_io_error()
            .unwrap_or_else(|| io::Error::other("filesystem loop detected"));
        SyncError::FileSystem { path, source }
    }
}

/// Result alias used across the library
pub type Result<T> = std::result::Result<T, SyncError>;
