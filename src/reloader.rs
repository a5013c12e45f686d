//! Reloader session: one watcher, one broadcaster, one layer.
//!
//! ```ignore
//! let reloader = Reloader::builder()
//!     .directory("ui")
//!     .on_reload(|| templates.invalidate())
//!     .build();
//!
//! let app = Router::new()
//!     .route("/", get(index))
//!     .layer(reloader.layer());
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::broadcast::{ReloadBroadcaster, ReloadCallback, ReloadWaiter};
use crate::config::ReloadConfig;
use crate::middleware::{DEFAULT_ENDPOINT, LiveReloadLayer};
use crate::watcher::{CoalescedSignal, DirectoryWatcher};

/// Default quiet window before a burst of changes fires a reload.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

/// A running live-reload instance.
///
/// Owns the watch loop task; dropping the reloader stops it. Instances are
/// independent, so several can run in one process.
pub struct Reloader {
    layer: LiveReloadLayer,
    broadcaster: ReloadBroadcaster,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Reloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reloader")
            .field("layer", &self.layer)
            .field("watching", &self.is_watching())
            .finish_non_exhaustive()
    }
}

impl Reloader {
    pub fn builder() -> ReloaderBuilder {
        ReloaderBuilder::new()
    }

    /// Tower layer that injects the script and serves the endpoint.
    pub fn layer(&self) -> LiveReloadLayer {
        self.layer.clone()
    }

    /// The client script, for embedding in templates by hand.
    pub fn script(&self) -> &str {
        std::str::from_utf8(self.layer.script()).unwrap_or_default()
    }

    pub fn endpoint(&self) -> &str {
        self.layer.endpoint()
    }

    pub fn broadcaster(&self) -> &ReloadBroadcaster {
        &self.broadcaster
    }

    /// Register interest in the next reload.
    pub fn subscribe(&self) -> ReloadWaiter {
        self.broadcaster.subscribe()
    }

    /// Wait for the next reload.
    pub async fn wait(&self) -> Option<CoalescedSignal> {
        self.subscribe().wait().await
    }

    /// Check if the watch loop is running.
    pub fn is_watching(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Token cancelled on shutdown. Open notification sockets close when it
    /// fires.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop the watch loop and wait for it to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("[watcher] watch task ended abnormally: {e}");
            }
        }
        crate::debug_event!("reload", "shut down");
    }
}

impl Drop for Reloader {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Builder for [`Reloader`].
pub struct ReloaderBuilder {
    directories: Vec<PathBuf>,
    endpoint: String,
    disable_caching: bool,
    debounce: Duration,
    on_reload: Option<ReloadCallback>,
}

impl Default for ReloaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReloaderBuilder {
    pub fn new() -> Self {
        Self {
            directories: Vec::new(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            disable_caching: true,
            debounce: DEFAULT_DEBOUNCE,
            on_reload: None,
        }
    }

    /// Start from the `[reload]` configuration section.
    pub fn from_config(config: &ReloadConfig) -> Self {
        Self::new()
            .directories(config.directories.iter().cloned())
            .endpoint(config.endpoint.clone())
            .disable_caching(config.disable_caching)
            .debounce(Duration::from_millis(config.debounce_ms))
    }

    /// Add a directory to watch recursively.
    pub fn directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.directories.push(dir.into());
        self
    }

    pub fn directories<I, P>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.directories.extend(dirs.into_iter().map(Into::into));
        self
    }

    /// Path the notification WebSocket is served on.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Add `Cache-Control: no-cache` to intercepted responses. On by default.
    pub fn disable_caching(mut self, disable: bool) -> Self {
        self.disable_caching = disable;
        self
    }

    pub fn debounce(mut self, window: Duration) -> Self {
        self.debounce = window;
        self
    }

    /// Run `callback` after files change, before any browser is told to
    /// reload. Keep it short: pending reloads wait for it.
    pub fn on_reload<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_reload = Some(Arc::new(callback));
        self
    }

    /// Start the reloader.
    ///
    /// Must be called inside a Tokio runtime. Directories are registered
    /// before this returns. Watch failures are logged and leave the
    /// middleware working without automatic reloads.
    pub fn build(self) -> Reloader {
        let mut broadcaster = ReloadBroadcaster::new();
        if let Some(callback) = self.on_reload {
            broadcaster = broadcaster.with_callback(callback);
        }

        let cancel = CancellationToken::new();
        let layer = LiveReloadLayer::with_shutdown(
            self.endpoint,
            self.disable_caching,
            broadcaster.clone(),
            cancel.clone(),
        );

        let task = if self.directories.is_empty() {
            crate::debug_event!("watcher", "disabled", "no directories configured");
            None
        } else {
            match DirectoryWatcher::new(&self.directories, self.debounce, broadcaster.clone()) {
                Ok(watcher) => {
                    let token = cancel.clone();
                    Some(tokio::spawn(async move {
                        if let Err(e) = watcher.run(token).await {
                            tracing::error!("[watcher] {e}");
                        }
                    }))
                }
                Err(e) => {
                    tracing::error!("[watcher] {e}, live reload will not trigger");
                    None
                }
            }
        };

        Reloader {
            layer,
            broadcaster,
            cancel,
            task,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_defaults() {
        let reloader = Reloader::builder().build();
        assert_eq!(reloader.endpoint(), "/reload_ws");
        assert!(!reloader.is_watching());
        assert!(reloader.script().contains("/reload_ws?v=1"));
    }

    #[tokio::test]
    async fn test_missing_directory_disables_watching() {
        let temp_dir = TempDir::new().unwrap();
        let reloader = Reloader::builder()
            .directory(temp_dir.path().join("missing"))
            .build();
        assert!(!reloader.is_watching());
    }

    #[tokio::test]
    async fn test_from_config() {
        let config = ReloadConfig {
            endpoint: "/__livereload".to_string(),
            ..ReloadConfig::default()
        };
        let reloader = ReloaderBuilder::from_config(&config).build();
        assert_eq!(reloader.endpoint(), "/__livereload");
    }

    #[tokio::test]
    async fn test_file_write_reloads_with_callback() {
        let temp_dir = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();

        let reloader = Reloader::builder()
            .directory(temp_dir.path())
            .debounce(Duration::from_millis(50))
            .on_reload(move || {
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .build();
        assert!(reloader.is_watching());

        let mut waiter = reloader.subscribe();
        fs::write(temp_dir.path().join("index.html"), "<body>v2</body>").unwrap();

        let signal = timeout(Duration::from_secs(5), waiter.wait())
            .await
            .expect("reload within timeout")
            .unwrap();
        assert_eq!(signal.name(), "index.html");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        reloader.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_watch_loop() {
        let temp_dir = TempDir::new().unwrap();
        let reloader = Reloader::builder().directory(temp_dir.path()).build();
        let token = reloader.shutdown_token();
        assert!(reloader.is_watching());

        reloader.shutdown().await;
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_independent_instances() {
        let first = Reloader::builder().endpoint("/a").build();
        let second = Reloader::builder().endpoint("/b").build();

        let mut waiter = first.subscribe();
        second.broadcaster().fire(CoalescedSignal {
            path: PathBuf::from("x.html"),
            events: 1,
        });

        assert!(timeout(Duration::from_millis(50), waiter.wait()).await.is_err());
    }
}
