//! Work items derived from file system events.

use std::path::{Path, PathBuf};

use notify::EventKind;
use notify::event::{ModifyKind, RenameMode};

/// What kind of node a modified path was when it was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeType {
    /// The path could not be inspected (or was never inspected).
    #[default]
    Unknown,

    /// The path was a directory.
    Directory,

    /// The path was anything other than a directory.
    File,
}

/// Collapsed event kind of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Created, written or had its metadata changed.
    Modified,

    /// Removed or renamed away.
    Deleted,
}

/// A single classified change.
///
/// For [`EventType::Deleted`] the node type is always [`NodeType::Unknown`]
/// and is ignored downstream, since the path no longer exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Path as reported by the notifier.
    pub path: PathBuf,

    /// Best-effort node classification.
    pub node_type: NodeType,

    /// Collapsed event kind.
    pub event_type: EventType,
}

impl WorkItem {
    /// Create a work item for a modified path.
    pub fn modified(path: impl Into<PathBuf>, node_type: NodeType) -> Self {
        Self {
            path: path.into(),
            node_type,
            event_type: EventType::Modified,
        }
    }

    /// Create a work item for a deleted path.
    pub fn deleted(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            node_type: NodeType::Unknown,
            event_type: EventType::Deleted,
        }
    }
}

/// A non-empty, ordered batch of work items dispatched as one script call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkPackage {
    items: Vec<WorkItem>,
}

impl WorkPackage {
    /// Wrap a batch. Returns `None` for an empty batch.
    pub fn new(items: Vec<WorkItem>) -> Option<Self> {
        if items.is_empty() {
            None
        } else {
            Some(Self { items })
        }
    }

    /// Items in first-observed order.
    pub fn items(&self) -> &[WorkItem] {
        &self.items
    }

    /// Paths of all items, in order.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.items.iter().map(|item| item.path.as_path())
    }

    /// The only item, if the package holds exactly one.
    pub fn single(&self) -> Option<&WorkItem> {
        match self.items.as_slice() {
            [item] => Some(item),
            _ => None,
        }
    }
}

/// One path of a notify event, translated into our event vocabulary but not
/// yet classified by node type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChange {
    /// Affected path.
    pub path: PathBuf,

    /// Collapsed event kind. `None` when the backend did not say which side
    /// of a rename the path is on; the path is then looked up on disk.
    pub event_type: Option<EventType>,

    /// Whether the path appeared in the tree (creation or rename into it).
    /// New directories need watches of their own.
    pub created: bool,
}

impl RawChange {
    fn modified(path: PathBuf, created: bool) -> Self {
        Self {
            path,
            event_type: Some(EventType::Modified),
            created,
        }
    }

    fn deleted(path: PathBuf) -> Self {
        Self {
            path,
            event_type: Some(EventType::Deleted),
            created: false,
        }
    }

    /// Translate a notify event into per-path changes.
    ///
    /// Access notifications and events of unknown kind produce nothing.
    pub fn from_event(event: notify::Event) -> Vec<Self> {
        let notify::Event { kind, paths, .. } = event;

        match kind {
            EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => paths
                .into_iter()
                .map(|path| Self::modified(path, true))
                .collect(),
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) | EventKind::Remove(_) => {
                paths.into_iter().map(Self::deleted).collect()
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                let mut paths = paths.into_iter();
                let mut changes = Vec::with_capacity(2);
                if let Some(from) = paths.next() {
                    changes.push(Self::deleted(from));
                }
                changes.extend(paths.map(|to| Self::modified(to, true)));
                changes
            }
            EventKind::Modify(ModifyKind::Name(_)) => paths
                .into_iter()
                .map(|path| Self {
                    path,
                    event_type: None,
                    created: true,
                })
                .collect(),
            EventKind::Modify(_) => paths
                .into_iter()
                .map(|path| Self::modified(path, false))
                .collect(),
            EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, MetadataKind, RemoveKind};
    use pretty_assertions::assert_eq;

    fn event(kind: EventKind, paths: &[&str]) -> notify::Event {
        paths
            .iter()
            .fold(notify::Event::new(kind), |e, p| e.add_path(PathBuf::from(p)))
    }

    #[test]
    fn test_create_is_modified_with_create_bit() {
        let changes = RawChange::from_event(event(EventKind::Create(CreateKind::Any), &["R/a"]));
        assert_eq!(
            changes,
            vec![RawChange {
                path: PathBuf::from("R/a"),
                event_type: Some(EventType::Modified),
                created: true,
            }]
        );
    }

    #[test]
    fn test_write_and_chmod_are_modified() {
        let write = RawChange::from_event(event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &["R/a"],
        ));
        let chmod = RawChange::from_event(event(
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)),
            &["R/a"],
        ));

        for changes in [write, chmod] {
            assert_eq!(changes.len(), 1);
            assert_eq!(changes[0].event_type, Some(EventType::Modified));
            assert!(!changes[0].created);
        }
    }

    #[test]
    fn test_remove_and_rename_from_are_deleted() {
        let remove = RawChange::from_event(event(EventKind::Remove(RemoveKind::File), &["R/a"]));
        let rename = RawChange::from_event(event(
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            &["R/a"],
        ));

        for changes in [remove, rename] {
            assert_eq!(changes, vec![RawChange::deleted(PathBuf::from("R/a"))]);
        }
    }

    #[test]
    fn test_rename_both_splits_into_delete_and_create() {
        let changes = RawChange::from_event(event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["R/old", "R/new"],
        ));

        assert_eq!(
            changes,
            vec![
                RawChange::deleted(PathBuf::from("R/old")),
                RawChange::modified(PathBuf::from("R/new"), true),
            ]
        );
    }

    #[test]
    fn test_ambiguous_rename_is_left_undecided() {
        let changes = RawChange::from_event(event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Any)),
            &["R/a"],
        ));

        assert_eq!(
            changes,
            vec![RawChange {
                path: PathBuf::from("R/a"),
                event_type: None,
                created: true,
            }]
        );
    }

    #[test]
    fn test_access_events_are_ignored() {
        let changes =
            RawChange::from_event(event(EventKind::Access(AccessKind::Any), &["R/a"]));
        assert!(changes.is_empty());
    }

    #[test]
    fn test_work_package_rejects_empty_batch() {
        assert!(WorkPackage::new(Vec::new()).is_none());

        let package = WorkPackage::new(vec![WorkItem::deleted("R/a")]).unwrap();
        assert_eq!(package.single(), Some(&WorkItem::deleted("R/a")));
    }
}
