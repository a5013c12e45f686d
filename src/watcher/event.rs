//! Change events as the watch loop sees them.
//!
//! notify reports a rich set of event kinds that differ per platform. The
//! loop only needs four, so everything is folded into [`ChangeKind`] here.

use std::path::PathBuf;

use notify::event::{EventKind, ModifyKind, RenameMode};
use tokio::time::Instant;

/// What happened to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Create,
    Write,
    Rename,
    Remove,
}

impl ChangeKind {
    /// Create and write events restart the quiet window.
    pub fn triggers_reload(self) -> bool {
        matches!(self, Self::Create | Self::Write)
    }

    /// Rename and remove events take the path out of the watched tree.
    pub fn leaves_tree(self) -> bool {
        matches!(self, Self::Rename | Self::Remove)
    }
}

/// A single filesystem change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
    pub timestamp: Instant,
}

impl ChangeEvent {
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
            timestamp: Instant::now(),
        }
    }

    /// Fold a notify event into zero or more change events.
    ///
    /// Metadata and access events carry no content change and produce
    /// nothing. A rename whose direction the platform could not tell is a
    /// create if the path still exists and a rename away otherwise.
    pub fn from_notify(event: notify::Event) -> Vec<ChangeEvent> {
        let now = Instant::now();
        let at = |path: PathBuf, kind| ChangeEvent {
            path,
            kind,
            timestamp: now,
        };

        match event.kind {
            EventKind::Create(_) => event
                .paths
                .into_iter()
                .map(|p| at(p, ChangeKind::Create))
                .collect(),
            EventKind::Remove(_) => event
                .paths
                .into_iter()
                .map(|p| at(p, ChangeKind::Remove))
                .collect(),
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => event
                .paths
                .into_iter()
                .map(|p| at(p, ChangeKind::Rename))
                .collect(),
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event
                .paths
                .into_iter()
                .map(|p| at(p, ChangeKind::Create))
                .collect(),
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                let mut paths = event.paths.into_iter();
                let mut events = Vec::with_capacity(2);
                if let Some(from) = paths.next() {
                    events.push(at(from, ChangeKind::Rename));
                }
                if let Some(to) = paths.next() {
                    events.push(at(to, ChangeKind::Create));
                }
                events
            }
            EventKind::Modify(ModifyKind::Name(_)) => event
                .paths
                .into_iter()
                .map(|p| {
                    let kind = if p.exists() {
                        ChangeKind::Create
                    } else {
                        ChangeKind::Rename
                    };
                    at(p, kind)
                })
                .collect(),
            EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
            EventKind::Modify(_) => event
                .paths
                .into_iter()
                .map(|p| at(p, ChangeKind::Write))
                .collect(),
            EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, MetadataKind, RemoveKind};
    use tempfile::TempDir;

    fn kinds(event: notify::Event) -> Vec<(PathBuf, ChangeKind)> {
        ChangeEvent::from_notify(event)
            .into_iter()
            .map(|e| (e.path, e.kind))
            .collect()
    }

    #[test]
    fn test_create_and_remove() {
        let created =
            notify::Event::new(EventKind::Create(CreateKind::File)).add_path("/ui/a.html".into());
        assert_eq!(
            kinds(created),
            vec![(PathBuf::from("/ui/a.html"), ChangeKind::Create)]
        );

        let removed =
            notify::Event::new(EventKind::Remove(RemoveKind::Folder)).add_path("/ui/old".into());
        assert_eq!(
            kinds(removed),
            vec![(PathBuf::from("/ui/old"), ChangeKind::Remove)]
        );
    }

    #[test]
    fn test_data_modify_is_write() {
        let event = notify::Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path("/ui/style.css".into());
        assert_eq!(
            kinds(event),
            vec![(PathBuf::from("/ui/style.css"), ChangeKind::Write)]
        );
    }

    #[test]
    fn test_metadata_and_access_ignored() {
        let chmod = notify::Event::new(EventKind::Modify(ModifyKind::Metadata(
            MetadataKind::Permissions,
        )))
        .add_path("/ui/a.html".into());
        assert!(ChangeEvent::from_notify(chmod).is_empty());

        let read =
            notify::Event::new(EventKind::Access(AccessKind::Any)).add_path("/ui/a.html".into());
        assert!(ChangeEvent::from_notify(read).is_empty());
    }

    #[test]
    fn test_rename_both_splits_into_rename_and_create() {
        let event = notify::Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path("/ui/page.html~".into())
            .add_path("/ui/page.html".into());
        assert_eq!(
            kinds(event),
            vec![
                (PathBuf::from("/ui/page.html~"), ChangeKind::Rename),
                (PathBuf::from("/ui/page.html"), ChangeKind::Create),
            ]
        );
    }

    #[test]
    fn test_rename_from_and_to() {
        let from = notify::Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
            .add_path("/ui/a".into());
        assert_eq!(kinds(from), vec![(PathBuf::from("/ui/a"), ChangeKind::Rename)]);

        let to = notify::Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To)))
            .add_path("/ui/b".into());
        assert_eq!(kinds(to), vec![(PathBuf::from("/ui/b"), ChangeKind::Create)]);
    }

    #[test]
    fn test_ambiguous_rename_checks_existence() {
        let temp_dir = TempDir::new().unwrap();
        let present = temp_dir.path().join("here.html");
        std::fs::write(&present, "<body></body>").unwrap();
        let gone = temp_dir.path().join("gone.html");

        let event = notify::Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Any)))
            .add_path(present.clone())
            .add_path(gone.clone());
        assert_eq!(
            kinds(event),
            vec![(present, ChangeKind::Create), (gone, ChangeKind::Rename)]
        );
    }

    #[test]
    fn test_kind_predicates() {
        assert!(ChangeKind::Create.triggers_reload());
        assert!(ChangeKind::Write.triggers_reload());
        assert!(!ChangeKind::Rename.triggers_reload());
        assert!(ChangeKind::Remove.leaves_tree());
        assert!(!ChangeKind::Write.leaves_tree());
    }
}
