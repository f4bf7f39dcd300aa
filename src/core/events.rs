//! Notifications emitted to the host
//!
//! The engine never presents anything itself. Everything a host needs to
//! redraw (tree patches, selection changes, content batches, token totals)
//! arrives through a `NotificationSink`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::core::model::{FileContent, FileNode};

/// A single notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum Notification {
    /// A directory's children changed
    TreeUpdated { path: PathBuf, node: FileNode },
    SelectionChanged { path: PathBuf, selected: bool },
    ContentCleared,
    ContentAdded { files: Vec<FileContent> },
    DirectoryTreeSet { text: String },
    TokenCountSet { count: usize },
}

impl Notification {
    /// Event name as it appears on the wire
    pub fn name(&self) -> &'static str {
        match self {
            Notification::TreeUpdated { .. } => "tree-updated",
            Notification::SelectionChanged { .. } => "selection-changed",
            Notification::ContentCleared => "content-cleared",
            Notification::ContentAdded { .. } => "content-added",
            Notification::DirectoryTreeSet { .. } => "directory-tree-set",
            Notification::TokenCountSet { .. } => "token-count-set",
        }
    }
}

/// A raw filesystem change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEvent {
    Add(PathBuf),
    AddDir(PathBuf),
    Unlink(PathBuf),
    UnlinkDir(PathBuf),
    Change(PathBuf),
}

impl FsEvent {
    pub fn path(&self) -> &Path {
        match self {
            FsEvent::Add(p)
            | FsEvent::AddDir(p)
            | FsEvent::Unlink(p)
            | FsEvent::UnlinkDir(p)
            | FsEvent::Change(p) => p,
        }
    }
}

/// Host-supplied receiver for notifications
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

impl<F> NotificationSink for F
where
    F: Fn(Notification) + Send + Sync,
{
    fn notify(&self, notification: Notification) {
        self(notification)
    }
}

/// Sink that records every notification, for tests and batch consumers
#[derive(Debug, Default)]
pub struct CollectingSink {
    received: Mutex<Vec<Notification>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take everything received so far
    pub fn drain(&self) -> Vec<Notification> {
        let mut guard = self.received.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *guard)
    }

    pub fn len(&self) -> usize {
        self.received.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NotificationSink for CollectingSink {
    fn notify(&self, notification: Notification) {
        self.received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notification);
    }
}
