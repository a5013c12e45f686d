//! The watch loop.
//!
//! One task owns the registry and the coalescer. It consumes notify events,
//! keeps the watched tree in step with the filesystem and fires the
//! broadcaster whenever a burst of changes settles.

use std::path::PathBuf;
use std::time::Duration;

use notify::Event;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::coalescer::{ChangeCoalescer, CoalescedSignal};
use super::event::{ChangeEvent, ChangeKind};
use super::registry::{WatchBackend, WatchRegistry};
use super::WatchError;
use crate::broadcast::ReloadBroadcaster;

/// Capacity of the notify -> loop channel.
const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Watches directory trees and turns changes into reload signals.
pub struct DirectoryWatcher<B: WatchBackend = notify::RecommendedWatcher> {
    registry: WatchRegistry<B>,
    coalescer: ChangeCoalescer,
    event_rx: mpsc::Receiver<notify::Result<Event>>,
    broadcaster: ReloadBroadcaster,
}

impl DirectoryWatcher<notify::RecommendedWatcher> {
    /// Create a watcher on the platform's native notify backend and register
    /// every directory under `roots`.
    ///
    /// Roots that can't be watched are logged and skipped.
    ///
    /// # Errors
    ///
    /// [`WatchError::InitFailed`] if notify can't start or no root could be
    /// registered at all.
    pub fn new(
        roots: &[PathBuf],
        debounce: Duration,
        broadcaster: ReloadBroadcaster,
    ) -> Result<Self, WatchError> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let backend = notify::recommended_watcher(move |res| {
            let _ = tx.blocking_send(res);
        })?;
        Self::with_backend(backend, rx, roots, debounce, broadcaster)
    }
}

impl<B: WatchBackend> DirectoryWatcher<B> {
    /// Create a watcher on an arbitrary backend whose events arrive on
    /// `event_rx`.
    pub fn with_backend(
        backend: B,
        event_rx: mpsc::Receiver<notify::Result<Event>>,
        roots: &[PathBuf],
        debounce: Duration,
        broadcaster: ReloadBroadcaster,
    ) -> Result<Self, WatchError> {
        let mut registry = WatchRegistry::new(backend);

        for root in roots {
            match registry.add_root(root) {
                Ok(count) => {
                    crate::log_event!(
                        "watcher",
                        "watching",
                        "{count} directories under {}",
                        root.display()
                    );
                }
                Err(e) => tracing::error!("[watcher] {e}"),
            }
        }

        if registry.roots().is_empty() {
            return Err(WatchError::InitFailed {
                reason: "no watchable directories".to_string(),
            });
        }

        Ok(Self {
            registry,
            coalescer: ChangeCoalescer::new(debounce),
            event_rx,
            broadcaster,
        })
    }

    /// Number of watched directories.
    pub fn watched_count(&self) -> usize {
        self.registry.len()
    }

    /// Run until `cancel` fires.
    ///
    /// # Errors
    ///
    /// [`WatchError::ChannelClosed`] if the notify backend goes away.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), WatchError> {
        crate::debug_event!("watcher", "started");

        loop {
            let deadline = self.coalescer.deadline();

            tokio::select! {
                _ = cancel.cancelled() => {
                    crate::debug_event!("watcher", "stopped");
                    return Ok(());
                }

                res = self.event_rx.recv() => match res {
                    Some(Ok(event)) => self.handle_event(event),
                    Some(Err(e)) => tracing::error!("[watcher] file watch error: {e}"),
                    None => return Err(WatchError::ChannelClosed),
                },

                _ = settle(deadline) => {
                    if let Some(signal) = self.coalescer.take_ready(Instant::now()) {
                        self.fire(signal);
                    }
                }
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        for change in ChangeEvent::from_notify(event) {
            self.apply(change);
        }
    }

    fn apply(&mut self, change: ChangeEvent) {
        crate::debug_event!(
            "watcher",
            "event",
            "{:?} {}",
            change.kind,
            change.path.display()
        );

        match change.kind {
            ChangeKind::Create => {
                if change.path.is_dir() {
                    if let Err(e) = self.registry.add_tree(&change.path) {
                        tracing::warn!("[watcher] {e}");
                    }
                }
                self.coalescer.record_at(change.path, change.timestamp);
            }
            ChangeKind::Write => {
                self.coalescer.record_at(change.path, change.timestamp);
            }
            ChangeKind::Rename | ChangeKind::Remove => {
                self.registry.prune(&change.path);
            }
        }
    }

    fn fire(&self, signal: CoalescedSignal) {
        crate::log_event!(
            "reload",
            "edit",
            "{} ({} events)",
            signal.name(),
            signal.events
        );
        let woken = self.broadcaster.fire(signal);
        crate::debug_event!("reload", "notified", "{woken} clients");
    }
}

/// Resolve at `deadline`, or never when nothing is pending.
async fn settle(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
