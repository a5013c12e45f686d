//! Coalesces bursts of file changes into a single reload signal.
//!
//! Editors rarely save in one event: a temp-file write, a rename and a final
//! write for one save is common. Each qualifying event pushes the deadline
//! out by the quiet window; the signal is released only once nothing has
//! arrived for that long.

use std::path::PathBuf;
use std::time::Duration;

use tokio::time::Instant;

/// One logical "reload due" event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoalescedSignal {
    /// Last path touched in the burst, for diagnostics.
    pub path: PathBuf,
    /// Number of events absorbed into this signal.
    pub events: usize,
}

impl CoalescedSignal {
    /// File name of the last touched path, or the full path if it has none.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Retriggerable deadline over a stream of change events.
#[derive(Debug)]
pub struct ChangeCoalescer {
    window: Duration,
    deadline: Option<Instant>,
    last_path: Option<PathBuf>,
    events: usize,
}

impl ChangeCoalescer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
            last_path: None,
            events: 0,
        }
    }

    /// Quiet window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record a qualifying event now.
    pub fn record(&mut self, path: PathBuf) {
        self.record_at(path, Instant::now());
    }

    /// Record a qualifying event at `now`, restarting the window.
    pub fn record_at(&mut self, path: PathBuf, now: Instant) {
        self.deadline = Some(now + self.window);
        self.last_path = Some(path);
        self.events += 1;
    }

    /// When the pending burst settles, if there is one.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn has_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Take the signal if the window has elapsed by `now`.
    ///
    /// Returns `Some` at most once per burst.
    pub fn take_ready(&mut self, now: Instant) -> Option<CoalescedSignal> {
        let deadline = self.deadline?;
        if now < deadline {
            return None;
        }

        self.deadline = None;
        let events = std::mem::take(&mut self.events);
        let path = self.last_path.take().unwrap_or_default();
        Some(CoalescedSignal { path, events })
    }
}
