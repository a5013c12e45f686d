//! Logging for the `livereload` binary, plus the event macros the library
//! logs through.
//!
//! The library never installs a subscriber; a host application brings its
//! own. Every line is tagged with the component that produced it:
//!
//! ```text
//! 14:02:11.480  INFO [watcher] watching: 12 directories under ui
//! 14:02:19.733  INFO [reload] edit: index.html (3 events)
//! 14:02:19.741  WARN [notify-ws] Injected script version is out of date (v0 < v1)
//! ```
//!
//! Tags: `watcher`, `reload`, `notify-ws`, `inject`, `serve`.
//!
//! Levels come from `[logging]` in `livereload.toml`, unless `RUST_LOG` is
//! set:
//!
//! ```bash
//! RUST_LOG=livereload=debug,tower_http=debug livereload serve ui
//! ```

use std::sync::Once;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// Level used when the configured directives don't parse.
const FALLBACK_LEVEL: &str = "info";

/// Wall-clock `HH:MM:SS.mmm`.
struct ClockTime;

impl FormatTime for ClockTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

/// Join the default level and per-module overrides into one directive list.
fn filter_directives(config: &LoggingConfig) -> String {
    std::iter::once(config.default.clone())
        .chain(
            config
                .modules
                .iter()
                .map(|(module, level)| format!("{module}={level}")),
        )
        .collect::<Vec<_>>()
        .join(",")
}

/// Pick the filter: `RUST_LOG` if set and valid, else the configuration.
///
/// Returns the directives that were rejected, if any, so they can be
/// reported once a subscriber exists.
fn build_filter(config: &LoggingConfig) -> (EnvFilter, Option<String>) {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return (filter, None);
    }
    let directives = filter_directives(config);
    match EnvFilter::try_new(&directives) {
        Ok(filter) => (filter, None),
        Err(_) => (EnvFilter::new(FALLBACK_LEVEL), Some(directives)),
    }
}

/// Install the subscriber for the binary.
///
/// Only the first call has an effect. Bad `[logging]` directives fall back
/// to `info` with a warning instead of failing startup.
pub fn init_with_config(config: &LoggingConfig) {
    INIT.call_once(|| {
        let (filter, rejected) = build_filter(config);

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_timer(ClockTime)
            .with_level(true)
            .with_filter(filter);

        tracing_subscriber::registry().with(fmt_layer).init();

        if let Some(directives) = rejected {
            tracing::warn!(
                "[serve] ignoring invalid log filter {directives:?}, using {FALLBACK_LEVEL}"
            );
        }
    });
}

/// Install the subscriber with [`LoggingConfig::default`].
pub fn init() {
    init_with_config(&LoggingConfig::default());
}

/// Log an event with component context.
///
/// # Examples
/// ```ignore
/// log_event!("watcher", "watching", "{} directories", count);
/// log_event!("reload", "fired");
/// ```
#[macro_export]
macro_rules! log_event {
    ($component:expr, $event:expr) => {
        tracing::info!("[{}] {}", $component, $event)
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        tracing::info!("[{}] {}: {}", $component, $event, format!($($arg)*))
    };
}

/// Debug-only event logging.
///
/// # Examples
/// ```ignore
/// debug_event!("notify-ws", "waiting", "{} waiters", count);
/// ```
#[macro_export]
macro_rules! debug_event {
    ($component:expr, $event:expr) => {
        tracing::debug!("[{}] {}", $component, $event)
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        tracing::debug!("[{}] {}: {}", $component, $event, format!($($arg)*))
    };
}
