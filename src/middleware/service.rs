//! Tower layer wiring the interceptor and the notification endpoint in
//! front of an arbitrary service.

use std::convert::Infallible;
use std::io;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::header::CACHE_CONTROL;
use axum::http::{HeaderValue, Method, Request, Response, StatusCode};
use futures::StreamExt;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tower::{Layer, Service};

use super::classify::{accepts_event_stream, expects_document};
use super::endpoint;
use super::interceptor::{BodyMode, ResponseInterceptor};
use super::script::injected_script;
use super::sink::{ChannelSink, ResponseSink};
use crate::broadcast::ReloadBroadcaster;

/// Default notification endpoint path.
pub const DEFAULT_ENDPOINT: &str = "/reload_ws";

/// How long a held-back body may sit idle before its head is sent anyway.
const IDLE_FLUSH: Duration = Duration::from_millis(50);

/// Give `endpoint` a leading `/` if it lacks one.
pub fn normalize_endpoint(endpoint: impl Into<String>) -> String {
    let mut endpoint = endpoint.into();
    if !endpoint.starts_with('/') {
        endpoint.insert(0, '/');
    }
    endpoint
}

struct LayerState {
    endpoint: String,
    disable_caching: bool,
    script: Bytes,
    broadcaster: ReloadBroadcaster,
    shutdown: CancellationToken,
}

/// Injects the reload script into HTML responses and serves the
/// notification endpoint.
#[derive(Clone)]
pub struct LiveReloadLayer {
    state: Arc<LayerState>,
}

impl std::fmt::Debug for LiveReloadLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveReloadLayer")
            .field("endpoint", &self.state.endpoint)
            .field("disable_caching", &self.state.disable_caching)
            .finish_non_exhaustive()
    }
}

impl LiveReloadLayer {
    /// Create a layer whose endpoint waits on `broadcaster`.
    ///
    /// `endpoint` gets a leading `/` if it lacks one.
    pub fn new(
        endpoint: impl Into<String>,
        disable_caching: bool,
        broadcaster: ReloadBroadcaster,
    ) -> Self {
        Self::with_shutdown(
            endpoint,
            disable_caching,
            broadcaster,
            CancellationToken::new(),
        )
    }

    /// Like [`LiveReloadLayer::new`], closing open notification sockets
    /// once `shutdown` is cancelled.
    pub fn with_shutdown(
        endpoint: impl Into<String>,
        disable_caching: bool,
        broadcaster: ReloadBroadcaster,
        shutdown: CancellationToken,
    ) -> Self {
        let endpoint = normalize_endpoint(endpoint);
        let script = Bytes::from(injected_script(&endpoint));
        Self {
            state: Arc::new(LayerState {
                endpoint,
                disable_caching,
                script,
                broadcaster,
                shutdown,
            }),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.state.endpoint
    }

    /// The script appended to HTML responses.
    pub fn script(&self) -> &[u8] {
        &self.state.script
    }
}

impl<S> Layer<S> for LiveReloadLayer {
    type Service = LiveReloadService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LiveReloadService {
            inner,
            state: self.state.clone(),
        }
    }
}

/// Service produced by [`LiveReloadLayer`].
#[derive(Clone)]
pub struct LiveReloadService<S> {
    inner: S,
    state: Arc<LayerState>,
}

impl<S> Service<Request<Body>> for LiveReloadService<S>
where
    S: Service<Request<Body>, Response = Response<Body>, Error = Infallible>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        // The clone may not be ready; keep the one that was polled
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let state = self.state.clone();

        Box::pin(async move {
            if req.uri().path() == state.endpoint {
                return Ok(endpoint::serve(req, &state.broadcaster, state.shutdown.clone()).await);
            }

            if accepts_event_stream(req.headers()) {
                return inner.call(req).await;
            }

            let document = req.method() != Method::HEAD && expects_document(req.headers());
            let mut response = inner.call(req).await?;
            // Every response, sub-resources included
            if state.disable_caching && !response.headers().contains_key(CACHE_CONTROL) {
                response
                    .headers_mut()
                    .insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            }

            if !document {
                return Ok(response);
            }
            Ok(intercept(response, state.script.clone()).await)
        })
    }
}

/// Replay `response` through a [`ResponseInterceptor`] on its own task and
/// return the rewritten response as soon as its head is decided.
///
/// A body that goes quiet for [`IDLE_FLUSH`] while held back is flushed, so
/// streamed pages get their head without waiting for the end.
async fn intercept(response: Response<Body>, script: Bytes) -> Response<Body> {
    let (parts, body) = response.into_parts();
    let status = parts.status;
    let (sink, head_rx, out_body) = ChannelSink::new(parts);
    let interceptor = ResponseInterceptor::new(sink, script);

    tokio::spawn(replay(status, body, interceptor));

    match head_rx.await {
        Ok(parts) => Response::from_parts(parts, out_body),
        Err(_) => {
            tracing::error!("[inject] response ended before its headers were sent");
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::BAD_GATEWAY;
            response
        }
    }
}

async fn replay(status: StatusCode, body: Body, mut interceptor: ResponseInterceptor<ChannelSink>) {
    if let Err(e) = interceptor.write_status(status).await {
        crate::debug_event!("inject", "aborted", "{e}");
        return;
    }

    let mut stream = body.into_data_stream();
    loop {
        let next = if interceptor.state().mode == BodyMode::Buffering {
            match tokio::time::timeout(IDLE_FLUSH, stream.next()).await {
                Ok(next) => next,
                Err(_) => {
                    crate::debug_event!("inject", "idle", "flushing held-back body");
                    if let Err(e) = interceptor.flush().await {
                        crate::debug_event!("inject", "aborted", "{e}");
                        return;
                    }
                    continue;
                }
            }
        } else {
            stream.next().await
        };
        let Some(chunk) = next else {
            break;
        };

        match chunk {
            Ok(chunk) => {
                if let Err(e) = interceptor.write_body(chunk).await {
                    crate::debug_event!("inject", "aborted", "{e}");
                    return;
                }
            }
            Err(e) => {
                tracing::warn!("[inject] upstream body failed: {e}");
                interceptor.into_inner().abort(io::Error::other(e)).await;
                return;
            }
        }
    }

    if let Err(e) = interceptor.finish().await {
        crate::debug_event!("inject", "aborted", "{e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::{ACCEPT, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::timeout;
    use tower::ServiceExt;
    use tower::service_fn;

    const PAGE: &str = "<html><body><h1>Hello</h1></body></html>";

    fn layer() -> LiveReloadLayer {
        LiveReloadLayer::new("/reload_ws", true, ReloadBroadcaster::new())
    }

    async fn page(_req: Request<Body>) -> Result<Response<Body>, Infallible> {
        Ok(Response::builder()
            .header(CONTENT_TYPE, "text/html; charset=utf-8")
            .header(CONTENT_LENGTH, PAGE.len())
            .body(Body::from(PAGE))
            .unwrap())
    }

    async fn stylesheet(_req: Request<Body>) -> Result<Response<Body>, Infallible> {
        Ok(Response::builder()
            .header(CONTENT_TYPE, "text/css")
            .body(Body::from("body { margin: 0 }"))
            .unwrap())
    }

    async fn read_body(response: Response<Body>) -> String {
        let mut stream = response.into_body().into_data_stream();
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        String::from_utf8(out).unwrap()
    }

    fn request(accept: Option<&'static str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/");
        if let Some(accept) = accept {
            builder = builder.header(ACCEPT, accept);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_document_gets_script_and_no_cache() {
        let layer = layer();
        let script = String::from_utf8(layer.script().to_vec()).unwrap();
        let svc = layer.layer(service_fn(page));

        let response = svc.oneshot(request(Some("text/html"))).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CACHE_CONTROL], "no-cache");
        let length: usize = response.headers()[CONTENT_LENGTH]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        let body = read_body(response).await;
        assert_eq!(body.len(), length);
        assert_eq!(
            body,
            format!("<html><body><h1>Hello</h1>{script}</body></html>")
        );
    }

    #[tokio::test]
    async fn test_sub_resource_body_untouched_but_not_cached() {
        let svc = layer().layer(service_fn(stylesheet));

        let response = svc.oneshot(request(Some("text/css,*/*;q=0.1"))).await.unwrap();

        assert_eq!(response.headers()[CACHE_CONTROL], "no-cache");
        assert_eq!(read_body(response).await, "body { margin: 0 }");
    }

    #[tokio::test]
    async fn test_event_stream_skipped_entirely() {
        let svc = layer().layer(service_fn(|_req: Request<Body>| async {
            Ok::<_, Infallible>(
                Response::builder()
                    .header(CONTENT_TYPE, "text/event-stream")
                    .body(Body::from("data: tick\n\n"))
                    .unwrap(),
            )
        }));

        let response = svc
            .oneshot(request(Some("text/event-stream")))
            .await
            .unwrap();

        assert!(response.headers().get(CACHE_CONTROL).is_none());
        assert_eq!(read_body(response).await, "data: tick\n\n");
    }

    #[tokio::test]
    async fn test_streamed_page_sends_head_before_body_ends() {
        let svc = layer().layer(service_fn(|_req: Request<Body>| async {
            let first = futures::stream::once(async {
                Ok::<_, Infallible>(Bytes::from_static(b"<html><body><h1>progress</h1>"))
            });
            Ok::<_, Infallible>(
                Response::builder()
                    .header(CONTENT_TYPE, "text/html")
                    .body(Body::from_stream(first.chain(futures::stream::pending())))
                    .unwrap(),
            )
        }));

        let pending = svc.oneshot(request(Some("text/html")));
        let response = timeout(Duration::from_secs(2), pending)
            .await
            .expect("head within timeout")
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let mut stream = response.into_body().into_data_stream();
        let chunk = timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("first chunk within timeout")
            .unwrap()
            .unwrap();
        let chunk = String::from_utf8(chunk.to_vec()).unwrap();
        // Script goes right after the opening tag already seen
        assert!(chunk.starts_with("<html><body>"));
        assert!(chunk.contains("/reload_ws?v=1"));
        assert!(chunk.ends_with("</script><h1>progress</h1>"));
    }

    #[tokio::test]
    async fn test_encoded_page_untouched() {
        const GZIP: &[u8] = b"\x1f\x8b\x08\x00\x00\x00\x00\x00\x00\x03\x03\x00\x00\x00";
        let svc = layer().layer(service_fn(|_req: Request<Body>| async {
            Ok::<_, Infallible>(
                Response::builder()
                    .header(CONTENT_TYPE, "text/html")
                    .header(CONTENT_ENCODING, "gzip")
                    .header(CONTENT_LENGTH, GZIP.len())
                    .body(Body::from(GZIP))
                    .unwrap(),
            )
        }));

        let response = svc.oneshot(request(Some("text/html"))).await.unwrap();

        assert_eq!(response.headers()[CONTENT_LENGTH], GZIP.len().to_string().as_str());
        let mut stream = response.into_body().into_data_stream();
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(out, GZIP);
    }

    #[tokio::test]
    async fn test_non_html_document_request_unmodified() {
        let svc = layer().layer(service_fn(stylesheet));

        let response = svc.oneshot(request(None)).await.unwrap();

        assert_eq!(response.headers()[CACHE_CONTROL], "no-cache");
        assert_eq!(read_body(response).await, "body { margin: 0 }");
    }

    #[tokio::test]
    async fn test_head_request_skipped() {
        let svc = layer().layer(service_fn(page));
        let req = Request::builder()
            .method(Method::HEAD)
            .uri("/")
            .body(Body::empty())
            .unwrap();

        let response = svc.oneshot(req).await.unwrap();

        // Not intercepted, so the length is the handler's own
        assert_eq!(response.headers()[CONTENT_LENGTH], PAGE.len().to_string().as_str());
        assert_eq!(response.headers()[CACHE_CONTROL], "no-cache");
    }

    #[tokio::test]
    async fn test_handler_cache_control_is_kept() {
        let svc = layer().layer(service_fn(|_req: Request<Body>| async {
            Ok::<_, Infallible>(
                Response::builder()
                    .header(CACHE_CONTROL, "max-age=60")
                    .body(Body::from("<body></body>"))
                    .unwrap(),
            )
        }));

        let response = svc.oneshot(request(Some("text/html"))).await.unwrap();
        assert_eq!(response.headers()[CACHE_CONTROL], "max-age=60");
    }

    #[tokio::test]
    async fn test_caching_allowed() {
        let layer = LiveReloadLayer::new("/reload_ws", false, ReloadBroadcaster::new());
        let svc = layer.layer(service_fn(page));

        let response = svc.oneshot(request(Some("text/html"))).await.unwrap();
        assert!(response.headers().get(CACHE_CONTROL).is_none());
    }

    #[tokio::test]
    async fn test_sniffed_html_gets_content_type() {
        let svc = layer().layer(service_fn(|_req: Request<Body>| async {
            Ok::<_, Infallible>(Response::new(Body::from("<!DOCTYPE html><body>x</body>")))
        }));

        let response = svc.oneshot(request(None)).await.unwrap();

        assert_eq!(response.headers()[CONTENT_TYPE], "text/html; charset=utf-8");
        assert!(read_body(response).await.contains("<script>"));
    }

    #[tokio::test]
    async fn test_endpoint_never_reaches_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let svc = layer().layer(service_fn(move |_req: Request<Body>| {
            seen.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, Infallible>(Response::new(Body::empty())) }
        }));
        let req = Request::builder()
            .uri("/reload_ws?v=1")
            .body(Body::empty())
            .unwrap();

        let response = svc.oneshot(req).await.unwrap();
        assert!(response.status().is_client_error());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_endpoint_gets_leading_slash() {
        let layer = LiveReloadLayer::new("__reload", true, ReloadBroadcaster::new());
        assert_eq!(layer.endpoint(), "/__reload");
        let script = String::from_utf8(layer.script().to_vec()).unwrap();
        assert!(script.contains("\"/__reload?v=1\""));
    }
}
