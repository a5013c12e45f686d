//! Error types for the directory watcher.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from watcher operations.
///
/// None of these stop the host process: initialization failures disable
/// watching, per-directory failures are logged and skipped.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Failed to initialize watcher: {reason}")]
    InitFailed { reason: String },

    #[error("Directory doesn't exist: {path}")]
    RootNotFound { path: PathBuf },

    #[error("Cannot watch path {path}: {reason}")]
    PathWatchFailed { path: PathBuf, reason: String },

    #[error("Error walking {path}: {reason}")]
    Walk { path: PathBuf, reason: String },

    #[error("Channel closed unexpectedly")]
    ChannelClosed,
}

impl WatchError {
    /// Returns the path associated with this error, if any.
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::RootNotFound { path }
            | Self::PathWatchFailed { path, .. }
            | Self::Walk { path, .. } => Some(path),
            Self::InitFailed { .. } | Self::ChannelClosed => None,
        }
    }
}

impl From<notify::Error> for WatchError {
    fn from(e: notify::Error) -> Self {
        WatchError::InitFailed {
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_not_found_display() {
        let err = WatchError::RootNotFound {
            path: PathBuf::from("/missing/ui"),
        };
        assert_eq!(err.to_string(), "Directory doesn't exist: /missing/ui");
        assert_eq!(err.path(), Some(&PathBuf::from("/missing/ui")));
    }

    #[test]
    fn test_from_notify_error() {
        let err: WatchError = notify::Error::generic("inotify limit reached").into();
        assert!(matches!(err, WatchError::InitFailed { .. }));
        assert!(err.to_string().contains("inotify limit reached"));
        assert!(err.path().is_none());
    }
}
