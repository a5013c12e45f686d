//! Response interception and script injection.
//!
//! [`ResponseInterceptor`] sits between a handler and its real sink. It
//! holds the body back until it knows whether the response is HTML, then
//! either forwards it untouched or forwards it with the reload script
//! inserted. HTML is held at most [`MAX_HOLD_BACK`] bytes, or until a flush;
//! after that it streams and the script lands in the prefix already seen or
//! at the very end. It exposes exactly the capabilities of the sink it wraps.

use std::borrow::Cow;
use std::io;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::header::{CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::inject::{SNIFF_LEN, inject_script, is_html_content_type, sniff_html};
use super::sink::{Capabilities, HijackedIo, ResponseSink};

const SNIFFED_HTML: &str = "text/html; charset=utf-8";

/// Largest HTML body held back for injection before it starts streaming.
pub const MAX_HOLD_BACK: usize = 256 * 1024;

/// Read size used when copying a reader through the buffer.
const COPY_BUF_LEN: usize = 8 * 1024;

/// How body bytes are currently handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BodyMode {
    /// Body held back: content type undecided, or HTML awaiting injection.
    #[default]
    Buffering,
    /// Not HTML. Head committed, bytes forwarded as they come.
    PassThrough,
    /// HTML whose head was committed early, by a flush or by outgrowing
    /// the hold-back limit.
    Streaming,
    /// Connection taken over; nothing more to do.
    Hijacked,
    Finished,
}

/// Per-response bookkeeping.
#[derive(Debug, Default)]
pub struct ResponseState {
    /// Status chosen by the handler. The first one wins.
    pub status: Option<StatusCode>,
    /// Whether the head has gone to the inner sink.
    pub committed: bool,
    /// Held-back body bytes.
    pub buffer: Vec<u8>,
    /// Resolved content type, once known.
    pub content_type: Option<String>,
    pub mode: BodyMode,
    /// Script already written into the forwarded bytes.
    pub script_sent: bool,
}

/// A sink wrapper that injects `script` into HTML responses.
pub struct ResponseInterceptor<S> {
    inner: S,
    capabilities: Capabilities,
    script: Bytes,
    state: ResponseState,
}

/// Compressed bodies can't take a plain-text script.
fn is_encoded(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_ENCODING)
        .is_some_and(|v| !v.as_bytes().trim_ascii().eq_ignore_ascii_case(b"identity"))
}

/// Statuses that never carry a body.
fn is_bodiless(status: StatusCode) -> bool {
    status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
}

impl<S: ResponseSink> ResponseInterceptor<S> {
    pub fn new(inner: S, script: Bytes) -> Self {
        let capabilities = inner.capabilities();
        Self {
            inner,
            capabilities,
            script,
            state: ResponseState::default(),
        }
    }

    pub fn state(&self) -> &ResponseState {
        &self.state
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Complete the response: resolve the content type, inject the script
    /// if the body is HTML and push out everything still held back.
    pub async fn finish(&mut self) -> io::Result<()> {
        match self.state.mode {
            BodyMode::Hijacked | BodyMode::Finished => return Ok(()),
            BodyMode::PassThrough => {}
            BodyMode::Streaming => {
                if !self.state.script_sent {
                    self.inner.write_body(self.script.clone()).await?;
                    self.state.script_sent = true;
                }
            }
            BodyMode::Buffering => {
                let status = *self.state.status.get_or_insert(StatusCode::OK);
                let html = !is_bodiless(status) && self.resolve_html(true).unwrap_or(false);
                let buffer = std::mem::take(&mut self.state.buffer);
                self.commit(html).await?;

                let body = if html {
                    self.state.script_sent = true;
                    match inject_script(&buffer, &self.script) {
                        Cow::Owned(injected) => injected,
                        // No body tag: append at the very end
                        Cow::Borrowed(_) => [buffer.as_slice(), &self.script[..]].concat(),
                    }
                } else {
                    buffer
                };

                if !body.is_empty() {
                    self.inner.write_body(Bytes::from(body)).await?;
                }
            }
        }

        self.state.mode = BodyMode::Finished;
        Ok(())
    }

    /// Decide whether the body is HTML.
    ///
    /// An explicit `Content-Type` wins. Otherwise the buffered prefix is
    /// sniffed, but only once [`SNIFF_LEN`] bytes are in or `complete` says
    /// no more are coming. `None` means not decidable yet. An encoded body
    /// is never treated as HTML.
    fn resolve_html(&mut self, complete: bool) -> Option<bool> {
        if is_encoded(self.inner.headers()) {
            return Some(false);
        }

        if let Some(content_type) = &self.state.content_type {
            return Some(is_html_content_type(content_type));
        }

        if let Some(value) = self.inner.headers().get(CONTENT_TYPE) {
            let content_type = String::from_utf8_lossy(value.as_bytes()).into_owned();
            let html = is_html_content_type(&content_type);
            self.state.content_type = Some(content_type);
            return Some(html);
        }

        if !complete && self.state.buffer.len() < SNIFF_LEN {
            return None;
        }

        let html = sniff_html(&self.state.buffer);
        if html {
            self.inner
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static(SNIFFED_HTML));
            self.state.content_type = Some(SNIFFED_HTML.to_string());
        } else {
            self.state.content_type = Some(String::new());
        }
        crate::debug_event!("inject", "sniffed", "html={html}");
        Some(html)
    }

    /// Send the head to the inner sink, once.
    ///
    /// For an HTML body with a fixed `Content-Length` the length grows by
    /// the script size first.
    async fn commit(&mut self, html: bool) -> io::Result<()> {
        if self.state.committed {
            return Ok(());
        }
        let status = *self.state.status.get_or_insert(StatusCode::OK);

        if html && !is_bodiless(status) {
            self.grow_content_length();
        }

        self.state.committed = true;
        self.inner.write_status(status).await
    }

    fn grow_content_length(&mut self) {
        let headers = self.inner.headers_mut();
        let Some(length) = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
        else {
            return;
        };
        let grown = length + self.script.len() as u64;
        headers.insert(CONTENT_LENGTH, HeaderValue::from(grown));
    }

    /// Commit and forward everything buffered so far, switching to `mode`.
    async fn release(&mut self, html: bool, mode: BodyMode) -> io::Result<()> {
        self.commit(html).await?;
        self.state.mode = mode;
        let buffer = std::mem::take(&mut self.state.buffer);
        if !buffer.is_empty() {
            self.inner.write_body(Bytes::from(buffer)).await?;
        }
        Ok(())
    }

    /// Commit now with whatever is buffered and stream the rest.
    ///
    /// HTML gets the script in the buffered prefix when it already holds a
    /// body tag, otherwise at the end. Anything else passes through.
    async fn stream_early(&mut self) -> io::Result<()> {
        let status = *self.state.status.get_or_insert(StatusCode::OK);
        let html = !is_bodiless(status) && self.resolve_html(true).unwrap_or(false);
        if !html {
            return self.release(false, BodyMode::PassThrough).await;
        }

        self.commit(true).await?;
        self.state.mode = BodyMode::Streaming;

        let buffer = std::mem::take(&mut self.state.buffer);
        let injected = match inject_script(&buffer, &self.script) {
            Cow::Owned(injected) => Some(injected),
            Cow::Borrowed(_) => None,
        };
        let body = match injected {
            Some(injected) => {
                self.state.script_sent = true;
                injected
            }
            None => buffer,
        };
        crate::debug_event!("inject", "streaming", "script_sent={}", self.state.script_sent);

        if !body.is_empty() {
            self.inner.write_body(Bytes::from(body)).await?;
        }
        Ok(())
    }

    fn missing(&self, capability: Capabilities, operation: &str) -> bool {
        if self.capabilities.contains(capability) {
            return false;
        }
        tracing::error!(
            "[inject] handler called {operation}() but the underlying response sink does not support it"
        );
        true
    }
}

#[async_trait]
impl<S: ResponseSink> ResponseSink for ResponseInterceptor<S> {
    fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    async fn write_status(&mut self, status: StatusCode) -> io::Result<()> {
        if self.state.status.is_some() {
            return Ok(());
        }
        self.state.status = Some(status);

        if self.state.mode != BodyMode::Buffering {
            return Ok(());
        }
        if is_bodiless(status) {
            return self.release(false, BodyMode::PassThrough).await;
        }
        // Known non-HTML goes straight through
        if self.resolve_html(false) == Some(false) {
            return self.release(false, BodyMode::PassThrough).await;
        }
        Ok(())
    }

    async fn write_body(&mut self, chunk: Bytes) -> io::Result<()> {
        if self.state.status.is_none() {
            self.write_status(StatusCode::OK).await?;
        }

        match self.state.mode {
            BodyMode::Buffering => {
                self.state.buffer.extend_from_slice(&chunk);
                match self.resolve_html(false) {
                    Some(false) => self.release(false, BodyMode::PassThrough).await?,
                    Some(true) if self.state.buffer.len() >= MAX_HOLD_BACK => {
                        self.stream_early().await?
                    }
                    _ => {}
                }
                Ok(())
            }
            BodyMode::PassThrough | BodyMode::Streaming => self.inner.write_body(chunk).await,
            BodyMode::Hijacked => Err(io::Error::other("connection has been hijacked")),
            BodyMode::Finished => Err(io::Error::other("response already finished")),
        }
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn flush(&mut self) -> io::Result<()> {
        if self.missing(Capabilities::FLUSH, "flush") {
            return self.inner.flush().await;
        }

        if self.state.mode == BodyMode::Buffering {
            self.stream_early().await?;
        }
        self.inner.flush().await
    }

    async fn hijack(&mut self) -> io::Result<Box<dyn HijackedIo>> {
        if self.missing(Capabilities::HIJACK, "hijack") {
            return self.inner.hijack().await;
        }
        let io = self.inner.hijack().await?;
        self.state.mode = BodyMode::Hijacked;
        self.state.buffer.clear();
        Ok(io)
    }

    async fn push(&mut self, target: &str, headers: &HeaderMap) -> io::Result<()> {
        let _ = self.missing(Capabilities::PUSH, "push");
        self.inner.push(target, headers).await
    }

    async fn read_from(&mut self, reader: &mut (dyn AsyncRead + Unpin + Send)) -> io::Result<u64> {
        if self.missing(Capabilities::READ_FROM, "read_from") {
            return self.inner.read_from(reader).await;
        }
        if self.state.status.is_none() {
            self.write_status(StatusCode::OK).await?;
        }
        if self.state.mode != BodyMode::Buffering {
            return self.inner.read_from(reader).await;
        }

        // Copy through write_body so the held-back buffer still sees every byte
        let mut buf = vec![0u8; COPY_BUF_LEN];
        let mut total = 0u64;
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return Ok(total);
            }
            total += n as u64;
            if self.state.mode == BodyMode::Buffering {
                self.write_body(Bytes::copy_from_slice(&buf[..n])).await?;
            } else {
                self.inner
                    .write_body(Bytes::copy_from_slice(&buf[..n]))
                    .await?;
                return Ok(total + self.inner.read_from(reader).await?);
            }
        }
    }
}
