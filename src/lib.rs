//! Development-time live reload for tower and axum services.
//!
//! Wrap a service with [`Reloader::layer`] and every HTML page it serves
//! gets a small script that reloads the tab whenever a file under one of the
//! watched directories changes.
//!
//! ```ignore
//! let reloader = livereload::Reloader::builder().directory("ui").build();
//! let app = axum::Router::new()
//!     .fallback_service(tower_http::services::ServeDir::new("ui"))
//!     .layer(reloader.layer());
//! ```

pub mod broadcast;
pub mod cli;
pub mod config;
pub mod logging;
pub mod middleware;
pub mod reloader;
pub mod watcher;

pub use broadcast::{ReloadBroadcaster, ReloadCallback, ReloadWaiter};
pub use config::Settings;
pub use middleware::{
    Capabilities, LiveReloadLayer, LiveReloadService, ResponseInterceptor, ResponseSink,
    WS_PROTOCOL_VERSION, expects_document, inject_script, injected_script,
};
pub use reloader::{Reloader, ReloaderBuilder};
pub use watcher::{CoalescedSignal, WatchError};
