//! Reload fan-out.
//!
//! Every open notification socket holds a [`ReloadWaiter`]. One call to
//! [`ReloadBroadcaster::fire`] wakes all of them at once. A waiter only sees
//! fires that happen after it subscribed; nothing is replayed to late
//! subscribers.

use std::fmt;
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::watcher::CoalescedSignal;

/// Hook run by [`ReloadBroadcaster::fire`] before any waiter wakes.
pub type ReloadCallback = Arc<dyn Fn() + Send + Sync>;

/// Default channel capacity. A waiter consumes one message per wake, so this
/// only needs to cover fires that land while a socket is between frames.
const CAPACITY: usize = 16;

/// Wakes every subscribed waiter on each reload.
#[derive(Clone)]
pub struct ReloadBroadcaster {
    sender: broadcast::Sender<CoalescedSignal>,
    on_reload: Option<ReloadCallback>,
}

impl fmt::Debug for ReloadBroadcaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReloadBroadcaster")
            .field("waiters", &self.sender.receiver_count())
            .field("on_reload", &self.on_reload.is_some())
            .finish()
    }
}

impl Default for ReloadBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl ReloadBroadcaster {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CAPACITY);
        Self {
            sender,
            on_reload: None,
        }
    }

    /// Attach a hook that runs synchronously at the start of every fire.
    pub fn with_callback(mut self, callback: ReloadCallback) -> Self {
        self.on_reload = Some(callback);
        self
    }

    /// Register a waiter for the next fire.
    pub fn subscribe(&self) -> ReloadWaiter {
        ReloadWaiter {
            receiver: self.sender.subscribe(),
        }
    }

    /// Number of currently registered waiters.
    pub fn waiters(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Run the reload hook, then wake every current waiter.
    ///
    /// Returns how many waiters were woken.
    pub fn fire(&self, signal: CoalescedSignal) -> usize {
        if let Some(callback) = &self.on_reload {
            callback();
        }

        match self.sender.send(signal) {
            Ok(count) => {
                crate::debug_event!("reload", "sent", "{count} waiters");
                count
            }
            Err(_) => {
                crate::debug_event!("reload", "dropped", "no waiters");
                0
            }
        }
    }
}

/// One pending interest in the next reload.
#[derive(Debug)]
pub struct ReloadWaiter {
    receiver: broadcast::Receiver<CoalescedSignal>,
}

impl ReloadWaiter {
    /// Wait for the next fire.
    ///
    /// Returns `None` once every broadcaster handle is gone. Cancel-safe:
    /// dropping the future abandons the wait without affecting other waiters.
    pub async fn wait(&mut self) -> Option<CoalescedSignal> {
        loop {
            match self.receiver.recv().await {
                Ok(signal) => return Some(signal),
                // Missed fires still mean a reload is due
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    crate::debug_event!("reload", "lagged", "{skipped} signals");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
