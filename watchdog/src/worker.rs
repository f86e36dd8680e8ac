//! Dispatch of work packages to the external sync scripts.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Result, WatchdogError};
use crate::event::{EventType, NodeType, WorkPackage};
use crate::process::wait_or_stop;

/// One of the three sync scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    /// Reconcile a whole file or subtree with the remote.
    BulkSync,

    /// Copy a single file to the remote.
    Copy,

    /// Remove a file or directory from the remote.
    Delete,
}

impl Script {
    /// All scripts, in a fixed order.
    pub const ALL: [Script; 3] = [Script::BulkSync, Script::Copy, Script::Delete];

    /// Executable name inside the scripts directory.
    pub fn file_name(self) -> &'static str {
        match self {
            Script::BulkSync => "bulk_sync",
            Script::Copy => "copy",
            Script::Delete => "delete",
        }
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

/// Location of the sync scripts.
#[derive(Debug, Clone)]
pub struct ScriptSet {
    dir: PathBuf,
}

impl ScriptSet {
    /// Scripts living in `dir`.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Full path of a script.
    pub fn path(&self, script: Script) -> PathBuf {
        self.dir.join(script.file_name())
    }

    /// Check that every script exists.
    pub fn verify(&self) -> Result<()> {
        for script in Script::ALL {
            let path = self.path(script);
            if !path.is_file() {
                return Err(WatchdogError::ScriptNotFound(path));
            }
        }
        Ok(())
    }
}

/// The script invocation chosen for a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCommand {
    /// Script to run.
    pub script: Script,

    /// Its single argument.
    pub target: PathBuf,
}

impl SyncCommand {
    /// Choose the script for a package.
    ///
    /// Several items are reconciled in bulk from their deepest common
    /// ancestor. A single item is deleted, copied if it is a known file, and
    /// bulk-synced otherwise.
    pub fn for_package(package: &WorkPackage) -> Self {
        let Some(item) = package.single() else {
            return Self {
                script: Script::BulkSync,
                target: longest_prefix(package.paths()),
            };
        };

        let script = match (item.event_type, item.node_type) {
            (EventType::Deleted, _) => Script::Delete,
            (EventType::Modified, NodeType::File) => Script::Copy,
            (EventType::Modified, NodeType::Directory | NodeType::Unknown) => Script::BulkSync,
        };

        Self {
            script,
            target: item.path.clone(),
        }
    }
}

/// Deepest path that is a component-wise prefix of every given path.
///
/// Returns `.` when the paths share nothing (or none are given).
pub fn longest_prefix<'a>(paths: impl IntoIterator<Item = &'a Path>) -> PathBuf {
    let mut paths = paths.into_iter();
    let Some(first) = paths.next() else {
        return PathBuf::from(".");
    };

    let mut prefix: Vec<Component<'a>> = first.components().collect();
    for path in paths {
        let common = prefix
            .iter()
            .zip(path.components())
            .take_while(|(a, b)| **a == *b)
            .count();
        prefix.truncate(common);
        if prefix.is_empty() {
            break;
        }
    }

    if prefix.is_empty() {
        PathBuf::from(".")
    } else {
        prefix.into_iter().collect()
    }
}

/// Runs sync scripts for the packages of one tree, strictly one at a time.
#[derive(Debug)]
pub struct Worker {
    /// Where the scripts live.
    scripts: Arc<ScriptSet>,

    /// Grace period between SIGTERM and SIGKILL on shutdown.
    kill_delay: Duration,
}

impl Worker {
    /// Create a new worker.
    pub fn new(scripts: Arc<ScriptSet>, kill_delay: Duration) -> Self {
        Self {
            scripts,
            kill_delay,
        }
    }

    /// Consume packages until the channel closes or `cancel` fires.
    ///
    /// Script failures are logged and never stop the loop.
    pub async fn run(self, mut packages: mpsc::Receiver<WorkPackage>, cancel: CancellationToken) {
        info!("Worker starting");

        loop {
            let package = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                package = packages.recv() => match package {
                    Some(package) => package,
                    None => break,
                },
            };

            match self.dispatch(&package, &cancel).await {
                Ok(()) => debug!("Sync script finished, waiting for new work"),
                Err(WatchdogError::Interrupted) => info!("Sync script interrupted by shutdown"),
                Err(e @ WatchdogError::Spawn { .. }) => error!("Dropping work package: {e}"),
                Err(e) => warn!("External command error: {e}"),
            }
        }

        info!("Worker shutting down");
    }

    /// Run the script for one package to completion.
    pub async fn dispatch(&self, package: &WorkPackage, cancel: &CancellationToken) -> Result<()> {
        let command = SyncCommand::for_package(package);
        let program = self.scripts.path(command.script);

        info!(
            "Calling {} {} for {} change(s)",
            command.script,
            command.target.display(),
            package.items().len()
        );

        let mut child = Command::new(&program)
            .arg(&command.target)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| WatchdogError::Spawn { program, source })?;

        wait_or_stop(&mut child, cancel, self.kill_delay).await
    }
}
