//! Filesystem watching for reload triggers.
//!
//! # Architecture
//!
//! ```text
//! DirectoryWatcher (one task)
//!   - WatchRegistry: non-recursive notify watch per directory
//!   - ChangeCoalescer: retriggerable quiet window
//!         |
//!   ReloadBroadcaster::fire
//! ```
//!
//! Directories are watched one by one rather than with notify's recursive
//! mode, so the registry tracks the tree itself: new directories are added
//! on their create event and pruned on rename or remove.

mod coalescer;
mod directory;
mod error;
mod event;
mod registry;
mod tree;

pub use coalescer::{ChangeCoalescer, CoalescedSignal};
pub use directory::DirectoryWatcher;
pub use error::WatchError;
pub use event::{ChangeEvent, ChangeKind};
pub use registry::{WatchBackend, WatchRegistry};
pub use tree::scan_directories;
