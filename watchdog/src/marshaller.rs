//! Coalescing of work items into work packages.
//!
//! The marshaller sits between the event watcher and the worker. It merges
//! redundant items and holds a batch open until no new item has arrived for
//! the tree's agglomeration window, so that bursts (save-all, checkouts,
//! generated files) end up in a single script invocation.

use std::pin::Pin;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::event::{EventType, WorkItem, WorkPackage};

/// The batch currently being assembled.
#[derive(Debug, Default)]
pub struct Batch {
    items: Vec<WorkItem>,
}

impl Batch {
    /// Create a new empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit an item.
    ///
    /// Scans newest to oldest: an exact duplicate is dropped, and a deletion
    /// replaces the most recent modification of the same path in place.
    /// Anything else is appended.
    pub fn push(&mut self, item: WorkItem) {
        for existing in self.items.iter_mut().rev() {
            if *existing == item {
                debug!("Ignored duplicate: {}", item.path.display());
                return;
            }
            if existing.path == item.path
                && existing.event_type == EventType::Modified
                && item.event_type == EventType::Deleted
            {
                debug!("Replaced modification with deletion: {}", item.path.display());
                *existing = item;
                return;
            }
        }

        debug!("Appended work item: {item:?}");
        self.items.push(item);
    }

    /// Check if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Get the number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Items admitted so far.
    #[cfg(test)]
    fn items(&self) -> &[WorkItem] {
        &self.items
    }

    /// Hand the batch off as a package, leaving a fresh empty batch behind.
    pub fn take(&mut self) -> Option<WorkPackage> {
        WorkPackage::new(std::mem::take(&mut self.items))
    }
}

/// Debounces work items of one tree into packages.
#[derive(Debug)]
pub struct WorkMarshaller {
    /// Quiet period that closes a batch.
    agglomeration: Duration,
}

impl WorkMarshaller {
    /// Create a marshaller with the given agglomeration window.
    pub fn new(agglomeration: Duration) -> Self {
        Self { agglomeration }
    }

    /// Run until `cancel` fires or the item stream ends.
    ///
    /// Dropping `packages` on return is what lets the worker drain and stop.
    /// A batch still pending at that point is discarded.
    pub async fn run(
        self,
        mut items: mpsc::Receiver<WorkItem>,
        packages: mpsc::Sender<WorkPackage>,
        cancel: CancellationToken,
    ) {
        info!("Work marshaller starting");

        let mut batch = Batch::new();
        let mut timer: Option<Pin<Box<Sleep>>> = None;

        loop {
            if batch.is_empty() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    item = items.recv() => {
                        let Some(item) = item else { break };
                        batch.push(item);
                        timer = Some(self.arm());
                    }
                }
            } else if let Some(sleep) = timer.as_mut() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sleep.as_mut() => {
                        timer = None;
                        // Only flush if the worker can take it right now;
                        // otherwise keep collecting.
                        if let Ok(permit) = packages.try_reserve() {
                            if let Some(package) = batch.take() {
                                debug!("Flushing {} item(s) after quiet period", package.items().len());
                                permit.send(package);
                            }
                        }
                    }
                    item = items.recv() => {
                        let Some(item) = item else { break };
                        batch.push(item);
                        sleep.as_mut().reset(Instant::now() + self.agglomeration);
                    }
                }
            } else {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    permit = packages.reserve() => {
                        let Ok(permit) = permit else { break };
                        if let Some(package) = batch.take() {
                            debug!("Flushing {} item(s) to ready worker", package.items().len());
                            permit.send(package);
                        }
                    }
                    item = items.recv() => {
                        let Some(item) = item else { break };
                        batch.push(item);
                        timer = Some(self.arm());
                    }
                }
            }
        }

        if !batch.is_empty() {
            debug!("Discarding {} pending item(s)", batch.len());
        }
        info!("Work marshaller shutting down");
    }

    fn arm(&self) -> Pin<Box<Sleep>> {
        Box::pin(tokio::time::sleep(self.agglomeration))
    }
}
