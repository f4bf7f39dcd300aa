//! Watch backend - filesystem subscriptions using notify
//!
//! This module is only available with the "watch" feature enabled.
//!
//! A backend owns one shallow base subscription on the root plus any number
//! of dedicated subscriptions opened for deeper subtrees. Every raw change
//! is translated to an `FsEvent` and handed to the `EventSender` given at
//! `open_base`; excluded basenames never reach it.

use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::backends::exclude::ExcludeSet;
use crate::core::error::{Result, SyncError};
use crate::core::events::FsEvent;

/// Where translated events go
pub type EventSender = Arc<dyn Fn(FsEvent) + Send + Sync>;

/// Filesystem subscription management
pub trait WatchBackend: Send + 'static {
    /// Open the base subscription on `root`, replacing any previous one
    fn open_base(&mut self, root: &Path, excludes: ExcludeSet, events: EventSender) -> Result<()>;

    /// Add `path` to the base subscription (non-recursive)
    fn attach(&mut self, path: &Path) -> Result<()>;

    /// Remove `path` from the base subscription
    fn detach(&mut self, path: &Path) -> Result<()>;

    /// Open a dedicated subscription on `path`. Depth 0 watches only the
    /// directory itself.
    fn open_subscription(&mut self, path: &Path, depth: usize) -> Result<()>;

    /// Close the dedicated subscription on `path`, if there is one
    fn close_subscription(&mut self, path: &Path) -> bool;

    /// Close everything. Idempotent.
    fn close_all(&mut self);
}

/// Production backend built on the platform's recommended notify watcher
#[derive(Default)]
pub struct NotifyBackend {
    base: Option<RecommendedWatcher>,
    dedicated: HashMap<PathBuf, RecommendedWatcher>,
    sink: Option<(EventSender, Arc<ExcludeSet>)>,
}

impl NotifyBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn make_watcher(&self) -> Result<RecommendedWatcher> {
        let Some((events, excludes)) = self.sink.clone() else {
            return Err(SyncError::Watch("base subscription not open".to_string()));
        };
        notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for fs_event in translate(&event, &excludes) {
                    events(fs_event);
                }
            }
            Err(e) => warn!("Watch error: {}", e),
        })
        .map_err(watch_error)
    }
}

impl WatchBackend for NotifyBackend {
    fn open_base(&mut self, root: &Path, excludes: ExcludeSet, events: EventSender) -> Result<()> {
        self.close_all();
        self.sink = Some((events, Arc::new(excludes)));
        let mut watcher = self.make_watcher()?;
        watcher
            .watch(root, RecursiveMode::NonRecursive)
            .map_err(watch_error)?;
        self.base = Some(watcher);
        debug!("Base subscription open on {}", root.display());
        Ok(())
    }

    fn attach(&mut self, path: &Path) -> Result<()> {
        let watcher = self
            .base
            .as_mut()
            .ok_or_else(|| SyncError::Watch("base subscription not open".to_string()))?;
        watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(watch_error)
    }

    fn detach(&mut self, path: &Path) -> Result<()> {
        match self.base.as_mut() {
            Some(watcher) => watcher.unwatch(path).map_err(watch_error),
            None => Ok(()),
        }
    }

    fn open_subscription(&mut self, path: &Path, depth: usize) -> Result<()> {
        let mut watcher = self.make_watcher()?;
        // notify has no depth limit; deeper events are dropped by the delta engine
        let mode = if depth == 0 {
            RecursiveMode::NonRecursive
        } else {
            RecursiveMode::Recursive
        };
        watcher.watch(path, mode).map_err(watch_error)?;
        self.dedicated.insert(path.to_path_buf(), watcher);
        debug!("Dedicated subscription open on {} (depth {})", path.display(), depth);
        Ok(())
    }

    fn close_subscription(&mut self, path: &Path) -> bool {
        self.dedicated.remove(path).is_some()
    }

    fn close_all(&mut self) {
        self.dedicated.clear();
        self.base = None;
        self.sink = None;
    }
}

fn watch_error(e: notify::Error) -> SyncError {
    SyncError::Watch(e.to_string())
}

/// Translate one notify event into zero or more `FsEvent`s
pub fn translate(event: &Event, excludes: &ExcludeSet) -> Vec<FsEvent> {
    let paths = &event.paths;
    let events = match event.kind {
        EventKind::Create(CreateKind::File) => paths.iter().cloned().map(FsEvent::Add).collect(),
        EventKind::Create(CreateKind::Folder) => {
            paths.iter().cloned().map(FsEvent::AddDir).collect()
        }
        EventKind::Create(_) => paths.iter().map(|p| added(p)).collect(),
        EventKind::Remove(RemoveKind::Folder) => {
            paths.iter().cloned().map(FsEvent::UnlinkDir).collect()
        }
        EventKind::Remove(_) => paths.iter().cloned().map(FsEvent::Unlink).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            paths.iter().cloned().map(FsEvent::Unlink).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            paths.iter().map(|p| added(p)).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if paths.len() == 2 => {
            vec![FsEvent::Unlink(paths[0].clone()), added(&paths[1])]
        }
        EventKind::Modify(ModifyKind::Name(_)) => paths
            .iter()
            .map(|p| {
                if p.exists() {
                    added(p)
                } else {
                    FsEvent::Unlink(p.clone())
                }
            })
            .collect(),
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => paths
            .iter()
            .filter(|p| !p.is_dir())
            .cloned()
            .map(FsEvent::Change)
            .collect(),
        _ => Vec::new(),
    };

    events
        .into_iter()
        .filter(|e| !excludes.excludes_path(e.path()))
        .collect()
}

fn added(path: &Path) -> FsEvent {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => FsEvent::AddDir(path.to_path_buf()),
        _ => FsEvent::Add(path.to_path_buf()),
    }
}
