//! Watch registry: the live set of watched directories.
//!
//! Every directory under a root gets its own non-recursive watch, so the set
//! has to follow the tree as it changes: new directories are added when their
//! create event arrives, renamed or removed ones are pruned together with
//! everything below them.

use std::collections::HashSet;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use notify::{RecursiveMode, Watcher};

use super::WatchError;
use super::tree::scan_directories;

/// The OS-level watch primitive, one directory at a time.
pub trait WatchBackend: Send {
    fn watch(&mut self, dir: &Path) -> notify::Result<()>;
    fn unwatch(&mut self, dir: &Path) -> notify::Result<()>;
}

impl WatchBackend for notify::RecommendedWatcher {
    fn watch(&mut self, dir: &Path) -> notify::Result<()> {
        Watcher::watch(self, dir, RecursiveMode::NonRecursive)
    }

    fn unwatch(&mut self, dir: &Path) -> notify::Result<()> {
        Watcher::unwatch(self, dir)
    }
}

/// Roots plus the set of currently watched directories.
///
/// Only the watch loop mutates a registry, so it needs no locking.
pub struct WatchRegistry<B> {
    backend: B,
    /// Canonicalized roots, in registration order.
    roots: Vec<PathBuf>,
    /// Every directory with an active watch.
    watched: HashSet<PathBuf>,
}

impl<B> fmt::Debug for WatchRegistry<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchRegistry")
            .field("roots", &self.roots)
            .field("watched", &self.watched.len())
            .finish_non_exhaustive()
    }
}

impl<B: WatchBackend> WatchRegistry<B> {
    /// Create an empty registry on top of `backend`.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            roots: Vec::new(),
            watched: HashSet::new(),
        }
    }

    /// Register a root and every directory beneath it.
    ///
    /// Returns the number of newly watched directories.
    pub fn add_root(&mut self, root: &Path) -> Result<usize, WatchError> {
        let root = root.canonicalize().map_err(|e| match e.kind() {
            ErrorKind::NotFound => WatchError::RootNotFound {
                path: root.to_path_buf(),
            },
            _ => WatchError::Walk {
                path: root.to_path_buf(),
                reason: e.to_string(),
            },
        })?;

        let added = self.add_tree(&root)?;
        if !self.roots.contains(&root) {
            self.roots.push(root);
        }
        Ok(added)
    }

    /// Watch `dir` and all directories below it.
    ///
    /// Directories that fail to register are logged and skipped. Returns the
    /// number of newly watched directories.
    pub fn add_tree(&mut self, dir: &Path) -> Result<usize, WatchError> {
        let mut added = 0;
        for dir in scan_directories(dir)? {
            match self.add_dir(dir) {
                Ok(true) => added += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!("[watcher] {e}"),
            }
        }
        Ok(added)
    }

    fn add_dir(&mut self, dir: PathBuf) -> Result<bool, WatchError> {
        if self.watched.contains(&dir) {
            return Ok(false);
        }

        self.backend
            .watch(&dir)
            .map_err(|e| WatchError::PathWatchFailed {
                path: dir.clone(),
                reason: e.to_string(),
            })?;

        crate::debug_event!("watcher", "watching", "{}", dir.display());
        self.watched.insert(dir);
        Ok(true)
    }

    /// Drop the watch on `path` and on every watched directory beneath it.
    ///
    /// Works from the registry's own set, so it is safe to call after the
    /// subtree has already disappeared from disk. Returns how many watches
    /// were dropped.
    pub fn prune(&mut self, path: &Path) -> usize {
        let doomed: Vec<PathBuf> = self
            .watched
            .iter()
            .filter(|dir| dir.starts_with(path))
            .cloned()
            .collect();

        for dir in &doomed {
            self.watched.remove(dir);
            // The OS usually drops the watch itself when a directory goes away
            if let Err(e) = self.backend.unwatch(dir) {
                crate::debug_event!("watcher", "unwatch skipped", "{}: {e}", dir.display());
            }
        }

        if !doomed.is_empty() {
            crate::debug_event!(
                "watcher",
                "pruned",
                "{} directories under {}",
                doomed.len(),
                path.display()
            );
        }
        doomed.len()
    }

    /// Check if a directory currently has a watch.
    pub fn contains(&self, dir: &Path) -> bool {
        self.watched.contains(dir)
    }

    /// Number of watched directories.
    pub fn len(&self) -> usize {
        self.watched.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watched.is_empty()
    }

    /// Registered roots.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// All watched directories, in no particular order.
    pub fn watched(&self) -> impl Iterator<Item = &Path> {
        self.watched.iter().map(PathBuf::as_path)
    }
}
