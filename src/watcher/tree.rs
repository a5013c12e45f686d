//! Directory tree enumeration.
//!
//! Lists a directory and every directory beneath it. Used once per root at
//! startup, and again whenever a new directory shows up inside a watched tree.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::WatchError;

/// Enumerate `root` and all of its sub-directories, root first.
///
/// Files are skipped; a `root` that is a file yields an empty list.
/// Symlinks are not followed. Entries that vanish or can't be read during the
/// walk are logged and skipped.
///
/// # Errors
///
/// [`WatchError::RootNotFound`] if `root` does not exist,
/// [`WatchError::Walk`] if its metadata can't be read.
pub fn scan_directories(root: &Path) -> Result<Vec<PathBuf>, WatchError> {
    let metadata = std::fs::metadata(root).map_err(|e| match e.kind() {
        ErrorKind::NotFound => WatchError::RootNotFound {
            path: root.to_path_buf(),
        },
        _ => WatchError::Walk {
            path: root.to_path_buf(),
            reason: e.to_string(),
        },
    })?;

    if !metadata.is_dir() {
        return Ok(Vec::new());
    }

    let mut directories = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        match entry {
            Ok(entry) if entry.file_type().is_dir() => directories.push(entry.into_path()),
            Ok(_) => {}
            Err(e) => {
                let path = e.path().unwrap_or(root).display().to_string();
                tracing::warn!("[watcher] skipping {path}: {e}");
            }
        }
    }

    Ok(directories)
}
