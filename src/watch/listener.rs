// src/watch/listener.rs

//! File listeners bound to a server mode.
//!
//! A [`ListenerFactory`] creates a fresh [`ListenerSet`] for the current
//! mode. Dropping (or disposing) the set stops every listener in it, so the
//! registry can replace sets without leaking callbacks.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::engine::{FileChangeKind, RuntimeEvent};
use crate::types::ServerMode;
use crate::watch::patterns::{ModePatterns, WatchPatterns};

/// A live file listener. Dropping it must stop its callbacks.
pub trait FileListener: Send {}

/// The listeners registered for one server mode.
pub struct ListenerSet {
    mode: ServerMode,
    listeners: Vec<Box<dyn FileListener>>,
}

impl fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerSet")
            .field("mode", &self.mode)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl ListenerSet {
    pub fn new(mode: ServerMode, listeners: Vec<Box<dyn FileListener>>) -> Self {
        Self { mode, listeners }
    }

    pub fn empty(mode: ServerMode) -> Self {
        Self::new(mode, Vec::new())
    }

    pub fn mode(&self) -> ServerMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Stop every listener in the set.
    pub fn dispose(self) {
        debug!(mode = ?self.mode, listeners = self.listeners.len(), "disposing file listeners");
        drop(self.listeners);
    }
}

pub trait ListenerFactory: Send + Sync {
    fn bind(&self, mode: ServerMode) -> Result<ListenerSet>;
}

/// Handle keeping one `notify` watcher alive.
struct NotifyListener {
    _watcher: RecommendedWatcher,
}

impl FileListener for NotifyListener {}

/// Production factory: one recursive `notify` watcher per root, filtered by
/// the patterns for the current mode, forwarding matches to the runtime.
pub struct NotifyListenerFactory {
    roots: Vec<PathBuf>,
    patterns: Arc<ModePatterns>,
    runtime_tx: mpsc::UnboundedSender<RuntimeEvent>,
}

impl fmt::Debug for NotifyListenerFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifyListenerFactory")
            .field("roots", &self.roots)
            .finish_non_exhaustive()
    }
}

impl NotifyListenerFactory {
    pub fn new(
        roots: Vec<PathBuf>,
        patterns: ModePatterns,
        runtime_tx: mpsc::UnboundedSender<RuntimeEvent>,
    ) -> Self {
        // Canonicalize once so event paths can be related back to roots.
        let roots = roots
            .into_iter()
            .map(|root| root.canonicalize().unwrap_or(root))
            .collect();
        Self {
            roots,
            patterns: Arc::new(patterns),
            runtime_tx,
        }
    }

    fn watch_root(&self, root: &Path, mode: ServerMode) -> Result<NotifyListener> {
        let root_buf = root.to_path_buf();
        let patterns = Arc::clone(&self.patterns);
        let tx = self.runtime_tx.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => forward_event(&root_buf, patterns.for_mode(mode), &tx, event),
                // notify calls us from its own thread; tracing is fine here.
                Err(err) => tracing::warn!(error = %err, "file watch error"),
            },
            Config::default(),
        )
        .context("creating file watcher")?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .with_context(|| format!("watching {}", root.display()))?;

        Ok(NotifyListener { _watcher: watcher })
    }
}

impl ListenerFactory for NotifyListenerFactory {
    fn bind(&self, mode: ServerMode) -> Result<ListenerSet> {
        if self.patterns.for_mode(mode).is_empty() {
            debug!(?mode, "no watch patterns for mode; registering no listeners");
            return Ok(ListenerSet::empty(mode));
        }

        let mut listeners: Vec<Box<dyn FileListener>> = Vec::with_capacity(self.roots.len());
        for root in &self.roots {
            listeners.push(Box::new(self.watch_root(root, mode)?));
        }
        info!(?mode, roots = ?self.roots, "file listeners bound");
        Ok(ListenerSet::new(mode, listeners))
    }
}

fn forward_event(
    root: &Path,
    patterns: &WatchPatterns,
    tx: &mpsc::UnboundedSender<RuntimeEvent>,
    event: Event,
) {
    let kind = match event.kind {
        EventKind::Create(_) => FileChangeKind::Created,
        EventKind::Modify(_) => FileChangeKind::Modified,
        EventKind::Remove(_) => FileChangeKind::Removed,
        _ => return,
    };

    for path in event.paths {
        if !patterns.matches(root, &path) {
            continue;
        }
        if tx.send(RuntimeEvent::FileChanged { path, kind }).is_err() {
            return;
        }
    }
}
