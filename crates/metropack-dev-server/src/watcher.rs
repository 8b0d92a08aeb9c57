//! Debounced recursive file watching.
//!
//! Events accumulate into a set; after `debounce` of quiescence the whole
//! batch is flushed in one call. Any event during the window restarts it.
//! Paths that no longer exist are discarded — editors that write through a
//! temp file emit a remove for the moved-away phase, and the rename of the
//! new content arrives separately.

use std::{
    path::{Component, Path, PathBuf},
    sync::{
        mpsc::{channel, Receiver, RecvTimeoutError},
        Arc,
    },
    time::Duration,
};

use anyhow::{Context, Result};
use notify::{
    event::{MetadataKind, ModifyKind},
    Config as NotifyConfig, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use rustc_hash::FxHashSet;
use tracing::{debug, warn};

const IGNORED_DIRS: &[&str] = &["node_modules", ".git", "dist", "build", ".next", ".turbo"];

const WATCHED_EXTS: &[&str] = &["js", "jsx", "ts", "tsx", "json"];

pub type FlushCallback = Arc<dyn Fn(Vec<PathBuf>) + Send + Sync>;

/// Keeps the underlying watcher alive; dropping it disconnects the event
/// channel and ends the watch thread.
pub struct WatcherHandle {
    _watcher: RecommendedWatcher,
}

pub fn spawn_watcher(
    root: PathBuf,
    debounce: Duration,
    on_flush: FlushCallback,
) -> Result<WatcherHandle> {
    let (tx, rx) = channel();
    let mut watcher = RecommendedWatcher::new(tx, NotifyConfig::default())
        .context("creating filesystem watcher")?;
    watcher
        .watch(&root, RecursiveMode::Recursive)
        .with_context(|| format!("watching {}", root.display()))?;
    debug!(root = %root.display(), "watcher started");

    std::thread::spawn(move || watch_thread(rx, root, debounce, on_flush));

    Ok(WatcherHandle { _watcher: watcher })
}

fn watch_thread(
    rx: Receiver<notify::Result<notify::Event>>,
    root: PathBuf,
    debounce: Duration,
    on_flush: FlushCallback,
) {
    let mut pending: FxHashSet<PathBuf> = FxHashSet::default();
    let mut watch_error_logged = false;

    loop {
        let event = if pending.is_empty() {
            match rx.recv() {
                Ok(event) => event,
                Err(_) => break,
            }
        } else {
            match rx.recv_timeout(debounce) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => {
                    let mut batch: Vec<PathBuf> = pending.drain().collect();
                    batch.sort();
                    debug!(changed = batch.len(), "flushing file-change batch");
                    on_flush(batch);
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        };

        match event {
            Ok(event) => accumulate(&event, &root, &mut pending),
            Err(error) => {
                // leave the server running; the next bundle request still
                // works, only change detection degrades
                if !watch_error_logged {
                    warn!(%error, "filesystem watcher error");
                    watch_error_logged = true;
                }
            }
        }
    }
}

/// Which events count as candidate updates. Both content changes and
/// renames qualify; metadata-only and access events do not.
fn accumulate(event: &notify::Event, root: &Path, pending: &mut FxHashSet<PathBuf>) {
    let relevant = matches!(
        event.kind,
        EventKind::Any
            | EventKind::Create(_)
            | EventKind::Remove(_)
            | EventKind::Modify(
                ModifyKind::Any
                    | ModifyKind::Data(_)
                    | ModifyKind::Name(_)
                    | ModifyKind::Metadata(MetadataKind::Any)
            )
    );
    if !relevant {
        return;
    }
    for path in &event.paths {
        // atomic-write deletion phase: the path is already gone
        if !path.is_file() {
            continue;
        }
        if is_watched_path(root, path) {
            pending.insert(path.clone());
        }
    }
}

fn is_watched_path(root: &Path, path: &Path) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return false;
    };
    for component in relative.components() {
        let Component::Normal(part) = component else {
            return false;
        };
        let Some(part) = part.to_str() else {
            return false;
        };
        if part.starts_with('.') || IGNORED_DIRS.contains(&part) {
            return false;
        }
    }
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| WATCHED_EXTS.contains(&ext))
}
