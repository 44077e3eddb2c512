//! Application-facing request and response types.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_core::Stream;
use h2pipe_hpack::HeaderField;
use tokio::sync::mpsc;

use crate::session::Session;
use crate::work_queue::WorkPoster;

/// Serves requests. One call per stream, run on its own task.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, request: Request) -> impl Future<Output = Response> + Send;
}

/// Handler built from an async closure.
#[derive(Debug, Clone, Copy)]
pub struct HandlerFn<F>(F);

/// Wrap `f` as a [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send,
{
    HandlerFn(f)
}

impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send,
{
    fn handle(&self, request: Request) -> impl Future<Output = Response> + Send {
        (self.0)(request)
    }
}

/// A decoded request.
#[derive(Debug)]
pub struct Request {
    pub stream_id: u32,
    pub method: String,
    pub path: String,
    pub scheme: Option<String>,
    pub authority: Option<String>,
    /// Regular header fields in arrival order; pseudo-headers removed.
    pub headers: Vec<HeaderField>,
    pub body: RequestBody,
}

impl Request {
    /// First value of the named header.
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|field| field.name.as_ref() == name.as_bytes())
            .map(|field| field.value.as_ref())
    }
}

/// Request body chunks as they arrive from the peer.
///
/// Each chunk handed out returns its bytes to the flow-control windows, so a
/// handler that stops reading stops the peer once the window is spent.
pub struct RequestBody {
    rx: Option<mpsc::UnboundedReceiver<Bytes>>,
    release: Option<(u32, WorkPoster<Session>)>,
}

impl RequestBody {
    pub fn empty() -> Self {
        Self {
            rx: None,
            release: None,
        }
    }

    pub(crate) fn channel(
        stream_id: u32,
        poster: WorkPoster<Session>,
    ) -> (mpsc::UnboundedSender<Bytes>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            tx,
            Self {
                rx: Some(rx),
                release: Some((stream_id, poster)),
            },
        )
    }

    /// Next chunk, or `None` once the peer ended the stream.
    pub async fn chunk(&mut self) -> Option<Bytes> {
        std::future::poll_fn(|cx| Pin::new(&mut *self).poll_next(cx)).await
    }

    /// Read the remaining body into one buffer.
    pub async fn collect(mut self) -> Bytes {
        let mut body = BytesMut::new();
        while let Some(chunk) = self.chunk().await {
            body.extend_from_slice(&chunk);
        }
        body.freeze()
    }
}

impl Stream for RequestBody {
    type Item = Bytes;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        let this = self.get_mut();
        let Some(rx) = this.rx.as_mut() else {
            return Poll::Ready(None);
        };
        match rx.poll_recv(cx) {
            Poll::Ready(Some(chunk)) => {
                if let Some((stream_id, poster)) = &this.release {
                    let stream_id = *stream_id;
                    let len = chunk.len() as u32;
                    poster.post(move |session: &mut Session| session.release_window(stream_id, len));
                }
                Poll::Ready(Some(chunk))
            }
            Poll::Ready(None) => {
                this.rx = None;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestBody")
            .field("finished", &self.rx.is_none())
            .finish()
    }
}

/// Response body.
#[derive(Debug, Default)]
pub enum ResponseBody {
    #[default]
    Empty,
    Full(Bytes),
    /// Chunks sent as DATA frames in order; the stream ends when the sender
    /// is dropped.
    Stream(mpsc::Receiver<Bytes>),
}

/// A response to one request.
#[derive(Debug)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<HeaderField>,
    pub body: ResponseBody,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: ResponseBody::Empty,
        }
    }

    pub fn ok() -> Self {
        Self::new(200)
    }

    /// Plain-text 200 response.
    pub fn text(body: impl Into<Bytes>) -> Self {
        Self::ok()
            .with_header("content-type", "text/plain")
            .with_body(body)
    }

    /// Add a header. Names are lowercased as HTTP/2 requires.
    pub fn with_header(mut self, name: &str, value: impl Into<Bytes>) -> Self {
        self.headers.push(HeaderField::new(
            name.to_ascii_lowercase().into_bytes(),
            value.into(),
        ));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = ResponseBody::Full(body.into());
        self
    }

    pub fn with_stream(mut self, chunks: mpsc::Receiver<Bytes>) -> Self {
        self.body = ResponseBody::Stream(chunks);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_builder() {
        let response = Response::text("hi").with_header("X-Trace", "abc");
        assert_eq!(response.status, 200);
        assert_eq!(
            response.headers,
            vec![
                HeaderField::new(&b"content-type"[..], &b"text/plain"[..]),
                HeaderField::new(&b"x-trace"[..], &b"abc"[..]),
            ]
        );
        assert!(matches!(response.body, ResponseBody::Full(ref b) if b.as_ref() == b"hi"));
    }

    #[tokio::test]
    async fn empty_body_ends_immediately() {
        let mut body = RequestBody::empty();
        assert_eq!(body.chunk().await, None);
        assert!(RequestBody::empty().collect().await.is_empty());
    }

    #[tokio::test]
    async fn body_chunks_release_window() {
        let (poster, mut receiver) = crate::work_queue::work_queue::<Session>();
        let (tx, body) = RequestBody::channel(1, poster);
        tx.send(Bytes::from_static(b"hello ")).unwrap();
        tx.send(Bytes::from_static(b"world")).unwrap();
        drop(tx);

        assert_eq!(body.collect().await.as_ref(), b"hello world");
        let mut released = 0;
        while receiver.try_recv().is_some() {
            released += 1;
        }
        assert_eq!(released, 2);
    }

    #[tokio::test]
    async fn handler_fn_wraps_closure() {
        let handler = handler_fn(|request: Request| async move {
            Response::text(format!("{} {}", request.method, request.path))
        });
        let request = Request {
            stream_id: 1,
            method: "GET".into(),
            path: "/x".into(),
            scheme: None,
            authority: None,
            headers: vec![HeaderField::new(&b"accept"[..], &b"*/*"[..])],
            body: RequestBody::empty(),
        };
        assert_eq!(request.header("accept"), Some(&b"*/*"[..]));
        let response = handler.handle(request).await;
        assert!(matches!(response.body, ResponseBody::Full(ref b) if b.as_ref() == b"GET /x"));
    }
}
