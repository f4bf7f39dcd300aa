//! ctxsync - Incremental file-tree sync and content aggregation
//!
//! Builds an in-memory tree of a project, tracks which files are selected,
//! keeps the tree in step with the filesystem and turns the selection into
//! fenced content blocks with token estimates.

pub mod backends;
pub mod core;
pub mod flows;

pub use crate::core::error::{Result, SyncError};
pub use crate::core::events::{FsEvent, Notification, NotificationSink};
pub use crate::core::model::{FileContent, FileNode, NodeKind, ReplaceRule};
pub use crate::core::settings::{SettingsProvider, SyncSettings};
pub use crate::core::tree::FileTree;
