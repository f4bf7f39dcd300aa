//! Watch service
//!
//! Binds one root to a live tree and keeps it in step with the filesystem.
//!
//! Lifecycle: `Uninitialized -> Initializing -> Active -> Disposed`. Calling
//! `initialize` again tears the previous root down first. `dispose` is
//! idempotent and, once it returns, no notification from this service
//! reaches the sink.
//!
//! All tree mutations from the filesystem run on a single event-loop task,
//! one event at a time, so later events always see the results of earlier
//! ones. Re-aggregations are queued on the same loop.

use anyhow::Context;
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backends::watch::{EventSender, NotifyBackend, WatchBackend};
use crate::core::error::{Result, SyncError};
use crate::core::events::{FsEvent, Notification, NotificationSink};
use crate::core::model::FileNode;
use crate::core::paths::is_within;
use crate::core::render::{RenderConfig, Renderer};
use crate::core::settings::{BatchOptions, CompiledSettings, SettingsProvider, SyncSettings};
use crate::core::tokenizer::EstimateMethod;
use crate::core::tree::FileTree;
use crate::flows::content::AggregationJob;
use crate::flows::delta::DeltaEngine;
use crate::flows::selection::{open_tree, toggle_selection};

/// Service lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Uninitialized,
    Initializing,
    Active,
    Disposed,
}

/// Blocks notifications once closed. Delivery holds the lock, so `close`
/// waits for an in-flight callback to finish.
struct Gate {
    open: Mutex<bool>,
    sink: Arc<dyn NotificationSink>,
}

impl Gate {
    fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            open: Mutex::new(true),
            sink,
        }
    }

    fn deliver(&self, notification: Notification) -> bool {
        let open = lock(&self.open);
        if !*open {
            return false;
        }
        self.sink.notify(notification);
        true
    }

    fn is_open(&self) -> bool {
        *lock(&self.open)
    }

    fn close(&self) {
        *lock(&self.open) = false;
    }
}

/// Live state of the bound root
struct RootState {
    tree: FileTree,
    engine: DeltaEngine,
    settings: CompiledSettings,
}

enum LoopMessage {
    Fs(FsEvent),
    Reaggregate,
}

/// Aggregation tuning for a service
#[derive(Debug, Clone, Copy, Default)]
pub struct AggregationOptions {
    pub batch: BatchOptions,
    pub method: EstimateMethod,
}

pub struct WatchService<B: WatchBackend> {
    backend: Arc<Mutex<B>>,
    sink: Arc<dyn NotificationSink>,
    settings: Arc<dyn SettingsProvider>,
    options: AggregationOptions,
    state: WatchState,
    gate: Option<Arc<Gate>>,
    root: Option<Arc<Mutex<RootState>>>,
    tx: Option<UnboundedSender<LoopMessage>>,
    task: Option<JoinHandle<()>>,
}

impl<B: WatchBackend> WatchService<B> {
    pub fn new(
        backend: B,
        sink: Arc<dyn NotificationSink>,
        settings: Arc<dyn SettingsProvider>,
    ) -> Self {
        Self {
            backend: Arc::new(Mutex::new(backend)),
            sink,
            settings,
            options: AggregationOptions::default(),
            state: WatchState::Uninitialized,
            gate: None,
            root: None,
            tx: None,
            task: None,
        }
    }

    pub fn with_options(mut self, options: AggregationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    /// Bind `root` with an already-built `tree` and start watching.
    ///
    /// Must be called from within a tokio runtime. The first aggregation is
    /// queued before this returns.
    pub fn initialize(&mut self, root: &Path, tree: FileTree) -> Result<()> {
        if self.state == WatchState::Disposed {
            return Err(SyncError::Disposed);
        }
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| SyncError::Watch(format!("no async runtime: {}", e)))?;

        self.teardown();
        self.state = WatchState::Initializing;

        let settings = self.settings.settings().compile(root);
        let (tx, rx) = mpsc::unbounded_channel();
        let events_tx = tx.clone();
        let events: EventSender = Arc::new(move |event| {
            let _ = events_tx.send(LoopMessage::Fs(event));
        });
        let opened = lock(&self.backend).open_base(root, settings.excludes.clone(), events);
        if let Err(e) = opened {
            lock(&self.backend).close_all();
            self.state = WatchState::Uninitialized;
            return Err(e);
        }

        let gate = Arc::new(Gate::new(self.sink.clone()));
        let state = Arc::new(Mutex::new(RootState {
            tree,
            engine: DeltaEngine::new(),
            settings,
        }));
        self.task = Some(handle.spawn(run_loop(
            rx,
            state.clone(),
            self.backend.clone(),
            gate.clone(),
            self.options,
        )));
        self.gate = Some(gate);
        self.root = Some(state);
        self.tx = Some(tx.clone());

        let _ = tx.send(LoopMessage::Reaggregate);
        self.state = WatchState::Active;
        info!("Watching {}", root.display());
        Ok(())
    }

    /// Expand `path`: load it lazily if needed and start patching it.
    ///
    /// With `depth`, a dedicated subscription covers the subtree; otherwise
    /// the path joins the base subscription. If subscribing fails the path is
    /// collapsed again.
    pub fn watch_directory(&mut self, path: &Path, depth: Option<usize>) -> Result<()> {
        let (state, gate) = self.active()?;
        let outcome = {
            let mut guard = lock(&state);
            let RootState {
                tree,
                engine,
                settings,
            } = &mut *guard;
            engine.expand(tree, path, settings)
        };
        for n in outcome.notifications {
            gate.deliver(n);
        }

        let subscribed = match depth {
            Some(depth) => lock(&self.backend).open_subscription(path, depth),
            None => lock(&self.backend).attach(path),
        };
        if subscribed.is_err() {
            lock(&state).engine.collapse(path);
        }
        subscribed
    }

    /// Stop patching `path`
    pub fn unwatch_directory(&mut self, path: &Path) -> Result<()> {
        let (state, _) = self.active()?;
        lock(&state).engine.collapse(path);
        let mut backend = lock(&self.backend);
        if backend.close_subscription(path) {
            Ok(())
        } else {
            backend.detach(path)
        }
    }

    /// Toggle selection and queue a re-aggregation.
    ///
    /// Returns false if `path` is not in the tree.
    pub fn set_selection(&mut self, path: &Path, selected: bool) -> Result<bool> {
        let (state, gate) = self.active()?;
        let found = toggle_selection(&mut lock(&state).tree, path, selected);
        if !found {
            return Ok(false);
        }
        gate.deliver(Notification::SelectionChanged {
            path: path.to_path_buf(),
            selected,
        });
        self.send(LoopMessage::Reaggregate);
        Ok(true)
    }

    /// Queue a re-aggregation of the current selection
    pub fn refresh(&mut self) -> Result<()> {
        self.active()?;
        self.send(LoopMessage::Reaggregate);
        Ok(())
    }

    /// Feed an event as if it came from the backend
    pub fn push_event(&self, event: FsEvent) -> Result<()> {
        if self.state != WatchState::Active {
            return Err(SyncError::Disposed);
        }
        self.send(LoopMessage::Fs(event));
        Ok(())
    }

    /// Current tree, serialized
    pub fn snapshot(&self) -> Option<FileNode> {
        self.root.as_ref().map(|state| lock(state).tree.to_node())
    }

    pub fn root_path(&self) -> Option<PathBuf> {
        self.root
            .as_ref()
            .map(|state| lock(state).tree.root_path().to_path_buf())
    }

    /// Stop everything. Safe to call more than once.
    pub fn dispose(&mut self) {
        if self.state == WatchState::Disposed {
            return;
        }
        self.teardown();
        self.state = WatchState::Disposed;
        info!("Watch service disposed");
    }

    fn teardown(&mut self) {
        if let Some(gate) = self.gate.take() {
            gate.close();
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.tx = None;
        self.root = None;
        lock(&self.backend).close_all();
    }

    fn active(&self) -> Result<(Arc<Mutex<RootState>>, Arc<Gate>)> {
        match (self.state, &self.root, &self.gate) {
            (WatchState::Active, Some(root), Some(gate)) => Ok((root.clone(), gate.clone())),
            (WatchState::Disposed, _, _) => Err(SyncError::Disposed),
            _ => Err(SyncError::Validation("watch service is not active".to_string())),
        }
    }

    fn send(&self, message: LoopMessage) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(message);
        }
    }
}

impl<B: WatchBackend> Drop for WatchService<B> {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn run_loop<B: WatchBackend>(
    mut rx: UnboundedReceiver<LoopMessage>,
    state: Arc<Mutex<RootState>>,
    backend: Arc<Mutex<B>>,
    gate: Arc<Gate>,
    options: AggregationOptions,
) {
    while let Some(message) = rx.recv().await {
        if !gate.is_open() {
            break;
        }
        let reaggregate = match message {
            LoopMessage::Fs(event) => {
                debug!("Applying {:?}", event);
                let outcome = {
                    let mut guard = lock(&state);
                    let RootState {
                        tree,
                        engine,
                        settings,
                    } = &mut *guard;
                    engine.apply(tree, &event, settings)
                };
                if !outcome.unwatched.is_empty() {
                    let mut backend = lock(&backend);
                    for path in &outcome.unwatched {
                        if !backend.close_subscription(path) {
                            if let Err(e) = backend.detach(path) {
                                debug!("Cannot detach {}: {}", path.display(), e);
                            }
                        }
                    }
                }
                for n in outcome.notifications {
                    gate.deliver(n);
                }
                outcome.reaggregate
            }
            LoopMessage::Reaggregate => true,
        };

        if reaggregate {
            let job = {
                let guard = lock(&state);
                AggregationJob::from_tree(&guard.tree, &guard.settings)
                    .with_options(options.batch)
                    .with_method(options.method)
            };
            let gate = gate.clone();
            let result = tokio::task::spawn_blocking(move || job.run(|n| gate.deliver(n))).await;
            if let Err(e) = result {
                warn!("Aggregation failed: {}", e);
            }
        }
    }
    debug!("Watch loop stopped");
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Run the watch service on `root`, printing every notification, until Ctrl-C
pub fn run_watch(
    root: &Path,
    settings: SyncSettings,
    saved: Option<&Path>,
    expand: &[PathBuf],
    options: AggregationOptions,
    config: RenderConfig,
) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(watch_until_interrupted(
        root, settings, saved, expand, options, config,
    ))
}

async fn watch_until_interrupted(
    root: &Path,
    settings: SyncSettings,
    saved: Option<&Path>,
    expand: &[PathBuf],
    options: AggregationOptions,
    config: RenderConfig,
) -> anyhow::Result<()> {
    let tree = open_tree(root, &settings, saved)
        .with_context(|| format!("Failed to scan {}", root.display()))?;

    let renderer = Renderer::with_config(config);
    let sink: Arc<dyn NotificationSink> = Arc::new(move |n: Notification| {
        let line = renderer.render_one(&n);
        if !line.is_empty() {
            println!("{}", line);
        }
    });

    let mut service =
        WatchService::new(NotifyBackend::new(), sink, Arc::new(settings)).with_options(options);
    service
        .initialize(root, tree)
        .with_context(|| format!("Failed to watch {}", root.display()))?;
    for dir in expand {
        service.watch_directory(&resolve(root, dir), None)?;
    }
    eprintln!("{} {}", "Watching".green().bold(), root.display());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if let Err(e) = handle_command(&mut service, root, &line) {
                        warn!("{}: {}", line.trim(), e);
                    }
                }
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!("Stopped reading commands: {}", e);
                    stdin_open = false;
                }
            },
        }
    }

    service.dispose();
    eprintln!("{}", "Stopped".yellow());
    Ok(())
}

/// Apply one stdin control line: `select|deselect|expand|collapse PATH` or `refresh`
pub fn handle_command<B: WatchBackend>(
    service: &mut WatchService<B>,
    root: &Path,
    line: &str,
) -> Result<()> {
    let line = line.trim();
    let (verb, arg) = match line.split_once(char::is_whitespace) {
        Some((verb, arg)) => (verb, arg.trim()),
        None => (line, ""),
    };
    let path = resolve(root, Path::new(arg));
    if !verb.is_empty() && verb != "refresh" && !is_within(&path, root) {
        return Err(SyncError::Validation(format!(
            "{} is outside {}",
            path.display(),
            root.display()
        )));
    }

    match verb {
        "" => Ok(()),
        "select" | "deselect" => {
            if !service.set_selection(&path, verb == "select")? {
                warn!("{} is not in the tree", path.display());
            }
            Ok(())
        }
        "expand" => service.watch_directory(&path, None),
        "collapse" => service.unwatch_directory(&path),
        "refresh" => service.refresh(),
        other => Err(SyncError::Validation(format!("unknown command {:?}", other))),
    }
}

fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}
