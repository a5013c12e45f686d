//! The response sink contract.
//!
//! A sink accepts a status, headers and body bytes, and optionally some
//! extra operations (flush, hijack, push, bulk copy). [`Capabilities`]
//! reports which of those a sink really supports so that wrappers can
//! advertise exactly the same set.

use std::io::{self, ErrorKind};
use std::mem;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::response::Parts;
use axum::http::{HeaderMap, Response, StatusCode};
use bitflags::bitflags;
use futures::SinkExt;
use futures::channel::mpsc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::oneshot;

bitflags! {
    /// Optional operations a [`ResponseSink`] supports.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u8 {
        /// Push buffered bytes to the client now.
        const FLUSH = 1;
        /// Take over the raw connection.
        const HIJACK = 1 << 1;
        /// HTTP/2 server push.
        const PUSH = 1 << 2;
        /// Bulk copy from a reader.
        const READ_FROM = 1 << 3;
    }
}

/// A raw connection handed out by [`ResponseSink::hijack`].
pub trait HijackedIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> HijackedIo for T {}

/// Where a handler writes its response.
///
/// The status is written once. Headers changed after that are ignored.
#[async_trait]
pub trait ResponseSink: Send {
    fn headers(&self) -> &HeaderMap;

    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Commit the status line and headers.
    async fn write_status(&mut self, status: StatusCode) -> io::Result<()>;

    /// Write body bytes, committing `200 OK` first if nothing was committed.
    async fn write_body(&mut self, chunk: Bytes) -> io::Result<()>;

    /// The optional operations this sink actually implements.
    fn capabilities(&self) -> Capabilities {
        Capabilities::empty()
    }

    async fn flush(&mut self) -> io::Result<()> {
        Err(unsupported("flush"))
    }

    async fn hijack(&mut self) -> io::Result<Box<dyn HijackedIo>> {
        Err(unsupported("hijack"))
    }

    async fn push(&mut self, target: &str, headers: &HeaderMap) -> io::Result<()> {
        let _ = (target, headers);
        Err(unsupported("push"))
    }

    /// Copy everything from `reader` into the body. Returns the byte count.
    async fn read_from(&mut self, reader: &mut (dyn AsyncRead + Unpin + Send)) -> io::Result<u64> {
        let _ = reader;
        Err(unsupported("read_from"))
    }
}

/// Error returned by operations a sink does not implement.
pub fn unsupported(operation: &str) -> io::Error {
    io::Error::new(
        ErrorKind::Unsupported,
        format!("response sink does not support {operation}"),
    )
}

/// Body channel depth between the replay task and the client connection.
const BODY_CHANNEL_CAPACITY: usize = 16;

/// Read size used by [`ChannelSink::read_from`].
const COPY_BUF_LEN: usize = 8 * 1024;

/// Sink that produces an `http::Response<Body>`.
///
/// The head goes out through a oneshot when the status is written; body
/// chunks stream through a bounded channel into the response body.
pub struct ChannelSink {
    parts: Parts,
    head_tx: Option<oneshot::Sender<Parts>>,
    body_tx: mpsc::Sender<io::Result<Bytes>>,
}

impl ChannelSink {
    /// Create a sink that starts from `parts` (status, headers, extensions).
    ///
    /// Returns the sink, a receiver for the committed head and the body the
    /// client will read.
    pub fn new(parts: Parts) -> (Self, oneshot::Receiver<Parts>, Body) {
        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::channel(BODY_CHANNEL_CAPACITY);
        let sink = Self {
            parts,
            head_tx: Some(head_tx),
            body_tx,
        };
        (sink, head_rx, Body::from_stream(body_rx))
    }

    /// Check if the head has been handed out.
    pub fn is_committed(&self) -> bool {
        self.head_tx.is_none()
    }

    /// End the response with an error.
    ///
    /// Before commit the head is never delivered; after commit the error
    /// surfaces in the body stream.
    pub async fn abort(mut self, err: io::Error) {
        if self.is_committed() {
            let _ = self.body_tx.send(Err(err)).await;
        }
    }

    fn commit(&mut self, status: StatusCode) -> io::Result<()> {
        let Some(head_tx) = self.head_tx.take() else {
            return Ok(());
        };

        let (placeholder, ()) = Response::new(()).into_parts();
        let mut parts = mem::replace(&mut self.parts, placeholder);
        parts.status = status;
        head_tx
            .send(parts)
            .map_err(|_| io::Error::new(ErrorKind::BrokenPipe, "response receiver dropped"))
    }
}

#[async_trait]
impl ResponseSink for ChannelSink {
    fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.parts.headers
    }

    async fn write_status(&mut self, status: StatusCode) -> io::Result<()> {
        self.commit(status)
    }

    async fn write_body(&mut self, chunk: Bytes) -> io::Result<()> {
        self.commit(StatusCode::OK)?;
        if chunk.is_empty() {
            return Ok(());
        }
        self.body_tx
            .send(Ok(chunk))
            .await
            .map_err(|_| io::Error::new(ErrorKind::BrokenPipe, "client went away"))
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::FLUSH | Capabilities::READ_FROM
    }

    async fn flush(&mut self) -> io::Result<()> {
        // Chunks are handed to the connection as soon as they are written
        self.commit(StatusCode::OK)
    }

    async fn read_from(&mut self, reader: &mut (dyn AsyncRead + Unpin + Send)) -> io::Result<u64> {
        let mut buf = vec![0u8; COPY_BUF_LEN];
        let mut total = 0u64;
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return Ok(total);
            }
            self.write_body(Bytes::copy_from_slice(&buf[..n])).await?;
            total += n as u64;
        }
    }
}
