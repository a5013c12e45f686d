//! HTTP side of live reload.
//!
//! ```text
//! request ─┬─ endpoint path ──────────────> notification WebSocket
//!          ├─ Accept: text/event-stream ──> inner service, untouched
//!          ├─ HEAD / not a document ──────> inner service (+ no-cache)
//!          └─ document ─> inner service ─> ResponseInterceptor ─> client
//!                         (+ no-cache)      (script injected if HTML)
//! ```

pub mod classify;
mod endpoint;
pub mod inject;
mod interceptor;
mod script;
mod service;
pub mod sink;

pub use classify::{accepts_event_stream, expects_document};
pub use endpoint::RELOAD_MESSAGE;
pub use inject::{inject_script, injection_point};
pub use interceptor::{BodyMode, MAX_HOLD_BACK, ResponseInterceptor, ResponseState};
pub use script::{WS_PROTOCOL_VERSION, injected_script};
pub use service::{DEFAULT_ENDPOINT, LiveReloadLayer, LiveReloadService, normalize_endpoint};
pub use sink::{Capabilities, ChannelSink, HijackedIo, ResponseSink};
