//! The notification WebSocket.
//!
//! Single-shot: each connection waits for one reload, sends `reload`, then
//! closes. The client script reconnects to wait for the next one.

use axum::body::Body;
use axum::extract::FromRequestParts;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::{Request, Response};
use axum::response::IntoResponse;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::script::WS_PROTOCOL_VERSION;
use crate::broadcast::{ReloadBroadcaster, ReloadWaiter};

/// Text frame sent to the client when it should reload.
pub const RELOAD_MESSAGE: &str = "reload";

#[derive(Debug, Default, Deserialize)]
struct VersionQuery {
    v: Option<String>,
}

/// Handle a request to the notification endpoint.
///
/// An outdated client version is only logged; the handshake still
/// completes. The waiter is registered before the upgrade response goes
/// out, so a reload fired during the handshake is not lost.
pub async fn serve(
    req: Request<Body>,
    broadcaster: &ReloadBroadcaster,
    shutdown: CancellationToken,
) -> Response<Body> {
    let (mut parts, _body) = req.into_parts();

    let version = parts
        .uri
        .query()
        .and_then(|query| serde_urlencoded::from_str::<VersionQuery>(query).ok())
        .and_then(|query| query.v)
        .unwrap_or_default();
    if version != WS_PROTOCOL_VERSION {
        tracing::warn!(
            "[notify-ws] Injected script version is out of date (v{version} < v{WS_PROTOCOL_VERSION})"
        );
    }

    let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            tracing::warn!("[notify-ws] handshake failed: {rejection}");
            return rejection.into_response();
        }
    };

    let waiter = broadcaster.subscribe();
    crate::debug_event!("notify-ws", "connected", "{} waiters", broadcaster.waiters());

    upgrade
        .on_upgrade(move |socket| notify_once(socket, waiter, shutdown))
        .into_response()
}

/// Wait for the next reload on an upgraded socket and deliver it.
async fn notify_once(mut socket: WebSocket, mut waiter: ReloadWaiter, shutdown: CancellationToken) {
    let reload = tokio::select! {
        signal = waiter.wait() => signal.is_some(),
        _ = client_gone(&mut socket) => {
            crate::debug_event!("notify-ws", "client left");
            return;
        }
        _ = shutdown.cancelled() => false,
    };

    if reload {
        if let Err(e) = socket.send(Message::Text(RELOAD_MESSAGE.into())).await {
            crate::debug_event!("notify-ws", "send failed", "{e}");
            return;
        }
        crate::debug_event!("notify-ws", "sent", "{RELOAD_MESSAGE}");
    }
    let _ = socket.send(Message::Close(None)).await;
}

/// Resolves when the client closes or the connection drops.
async fn client_gone(socket: &mut WebSocket) {
    while let Some(msg) = socket.recv().await {
        match msg {
            Ok(Message::Close(_)) | Err(_) => return,
            Ok(_) => {}
        }
    }
}
