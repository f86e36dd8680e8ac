//! Wiring of per-tree pipelines and their shared supervision.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, info, info_span};

use crate::config::{Configuration, TreeConfig};
use crate::error::Result;
use crate::event::{WorkItem, WorkPackage};
use crate::marshaller::WorkMarshaller;
use crate::watcher::EventWatcher;
use crate::worker::{ScriptSet, Worker};

/// Capacity of the items and packages channels. Kept minimal so that a busy
/// worker slows the watcher down instead of letting work pile up.
const HANDOFF_CAPACITY: usize = 1;

/// A running set of pipelines, one per watched tree.
///
/// Every pipeline consists of an event watcher, a work marshaller and a
/// worker. All of them observe one cancellation token and are tracked so
/// that shutdown can wait for every child process to be reaped.
#[derive(Debug)]
pub struct Watchdog {
    /// Cancels every pipeline.
    cancel: CancellationToken,

    /// Tracks every pipeline task.
    tracker: TaskTracker,

    /// Number of trees being watched.
    trees: usize,
}

impl Watchdog {
    /// Start one pipeline per configured tree.
    ///
    /// Must be called within a tokio runtime. Fails without starting anything
    /// if an OS watcher cannot be created.
    pub fn start(config: &Configuration, scripts: ScriptSet) -> Result<Self> {
        Self::start_trees(&config.trees, scripts, config.kill_delay)
    }

    /// Start pipelines for the given trees.
    pub fn start_trees(trees: &[TreeConfig], scripts: ScriptSet, kill_delay: Duration) -> Result<Self> {
        let watchers = trees
            .iter()
            .map(|tree| EventWatcher::new(&tree.root, Arc::clone(&tree.excludes)))
            .collect::<Result<Vec<_>>>()?;

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let scripts = Arc::new(scripts);

        for (tree, mut watcher) in trees.iter().zip(watchers) {
            let span = info_span!("tree", root = %tree.root.display());
            let (items_tx, items_rx) = mpsc::channel::<WorkItem>(HANDOFF_CAPACITY);
            let (packages_tx, packages_rx) = mpsc::channel::<WorkPackage>(HANDOFF_CAPACITY);

            tracker.spawn(
                WorkMarshaller::new(tree.agglomeration)
                    .run(items_rx, packages_tx, cancel.clone())
                    .instrument(span.clone()),
            );
            tracker.spawn(
                Worker::new(Arc::clone(&scripts), kill_delay)
                    .run(packages_rx, cancel.clone())
                    .instrument(span.clone()),
            );

            span.in_scope(|| watcher.watch_tree());
            tracker.spawn(watcher.run(items_tx, cancel.clone()).instrument(span));
        }

        tracker.close();
        info!("Started {} pipeline(s)", trees.len());

        Ok(Self {
            cancel,
            tracker,
            trees: trees.len(),
        })
    }

    /// Number of trees being watched.
    pub fn trees(&self) -> usize {
        self.trees
    }

    /// Ask every pipeline to stop. Idempotent.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Wait until every pipeline task has exited.
    pub async fn wait(&self) {
        self.tracker.wait().await;
    }

    /// Stop every pipeline and wait for them.
    pub async fn stop(self) {
        self.shutdown();
        self.wait().await;
        info!("All pipelines stopped");
    }
}
