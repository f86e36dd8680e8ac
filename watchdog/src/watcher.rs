//! Event watcher: turns raw notifications into work items.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::error::Result;
use crate::event::{EventType, NodeType, RawChange, WorkItem};
use crate::filter::{ExcludeSet, classify, exists};

/// Raw notifications buffered between notify's thread and the watcher task.
/// Notifications arriving while it is full are dropped.
const RAW_EVENT_BUFFER: usize = 1000;

/// Watches one tree and produces work items for its marshaller.
///
/// The OS primitive does not recurse on its own, so every directory is
/// watched individually and directories that appear later get watches as
/// soon as their creation is seen. Changes made inside a new directory
/// before its watch is installed are lost, and so are notifications that
/// arrive while the raw buffer is full.
pub struct EventWatcher {
    /// Root of the watched tree.
    root: PathBuf,

    /// Exclusion patterns of the tree.
    excludes: Arc<ExcludeSet>,

    /// Internal notify watcher. Watches are added from the blocking pool.
    watcher: Arc<Mutex<RecommendedWatcher>>,

    /// Raw events forwarded from the notify callback.
    raw_events: mpsc::Receiver<notify::Result<notify::Event>>,

    /// Set by the notify callback when it had to drop a notification.
    overflowed: Arc<AtomicBool>,
}

impl EventWatcher {
    /// Create the OS watcher for a tree. No directory is watched yet.
    pub fn new(root: impl Into<PathBuf>, excludes: Arc<ExcludeSet>) -> Result<Self> {
        let (raw_tx, raw_events) = mpsc::channel(RAW_EVENT_BUFFER);
        let overflowed = Arc::new(AtomicBool::new(false));

        // The callback runs on notify's event loop thread, which must never
        // block: adding a watch waits for that thread to answer.
        let flag = Arc::clone(&overflowed);
        let watcher = notify::recommended_watcher(
            move |res: std::result::Result<notify::Event, notify::Error>| {
                if let Err(TrySendError::Full(_)) = raw_tx.try_send(res) {
                    flag.store(true, Ordering::Relaxed);
                }
            },
        )?;

        Ok(Self {
            root: root.into(),
            excludes,
            watcher: Arc::new(Mutex::new(watcher)),
            raw_events,
            overflowed,
        })
    }

    /// Watch the root and every directory below it.
    ///
    /// Returns the number of directories now watched.
    pub fn watch_tree(&mut self) -> usize {
        let mut watcher = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
        let added = add_watches(&mut *watcher, &self.root);
        if added == 0 {
            warn!("Nothing is watched under {}", self.root.display());
        } else {
            info!(
                "Watching {} ({added} directories, {} exclude patterns)",
                self.root.display(),
                self.excludes.len()
            );
        }
        added
    }

    /// Forward work items until `cancel` fires or the marshaller is gone.
    pub async fn run(mut self, items: mpsc::Sender<WorkItem>, cancel: CancellationToken) {
        info!("Event watcher starting");

        'events: loop {
            let res = tokio::select! {
                _ = cancel.cancelled() => break,
                res = self.raw_events.recv() => match res {
                    Some(res) => res,
                    None => break,
                },
            };

            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    error!("Watch error: {e}");
                    continue;
                }
            };
            if event.need_rescan() {
                warn!("Notifier dropped events under {}", self.root.display());
            }
            if self.overflowed.swap(false, Ordering::Relaxed) {
                warn!(
                    "Event buffer full, dropped changes under {}",
                    self.root.display()
                );
            }
            debug!("{event:?}");

            for change in RawChange::from_event(event) {
                if self.excludes.is_excluded(&change.path) {
                    debug!("Ignored {}", change.path.display());
                    continue;
                }

                let item = self.translate(change).await;
                tokio::select! {
                    _ = cancel.cancelled() => break 'events,
                    sent = items.send(item) => {
                        if sent.is_err() {
                            break 'events;
                        }
                    }
                }
            }
        }

        info!("Event watcher shutting down");
    }

    /// Classify a change, extending the watch set for new directories.
    async fn translate(&self, change: RawChange) -> WorkItem {
        let event_type = match change.event_type {
            Some(event_type) => event_type,
            None if exists(&change.path).await => EventType::Modified,
            None => EventType::Deleted,
        };

        match event_type {
            EventType::Deleted => WorkItem::deleted(change.path),
            EventType::Modified => {
                let node_type = classify(&change.path).await;
                if node_type == NodeType::Directory && change.created {
                    self.extend_watches(&change.path).await;
                }
                WorkItem::modified(change.path, node_type)
            }
        }
    }

    /// Watch a new directory and everything already below it.
    ///
    /// The walk can be long, so it runs on the blocking pool.
    async fn extend_watches(&self, dir: &Path) {
        let watcher = Arc::clone(&self.watcher);
        let root = dir.to_path_buf();
        let walk = tokio::task::spawn_blocking(move || {
            let mut watcher = watcher.lock().unwrap_or_else(PoisonError::into_inner);
            add_watches(&mut *watcher, &root)
        });

        match walk.await {
            Ok(added) => debug!("Watching new directory {} ({added} directories)", dir.display()),
            Err(e) => error!("Failed to watch {}: {e}", dir.display()),
        }
    }
}

impl std::fmt::Debug for EventWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventWatcher")
            .field("root", &self.root)
            .field("excludes", &self.excludes)
            .finish_non_exhaustive()
    }
}

/// Watch `root` and every directory below it, one at a time.
///
/// Directories that cannot be read or watched are logged and skipped.
fn add_watches<W: Watcher>(watcher: &mut W, root: &Path) -> usize {
    let mut added = 0;

    for entry in WalkDir::new(root) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry: {e}");
                continue;
            }
        };
        if !entry.file_type().is_dir() {
            continue;
        }

        match watcher.watch(entry.path(), RecursiveMode::NonRecursive) {
            Ok(()) => added += 1,
            Err(e) => warn!("Failed to watch {}: {e}", entry.path().display()),
        }
    }

    added
}
