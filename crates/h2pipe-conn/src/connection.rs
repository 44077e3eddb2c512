//! One accepted connection: lifecycle, control handle and protocol loop.
//!
//! ```text
//! Initializing ──preface──▶ Active ──drain / GOAWAY / EOF──▶ Draining
//!       │                     │                                │
//!       └──── error / abort ──┴──────── error / abort / timeout┴──▶ ShuttingDown ──▶ Closed
//! ```
//!
//! Draining connections close directly once their last stream finishes.

use std::fmt;
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::FutureExt;
use h2pipe_frame::{ErrorCode, CONNECTION_PREFACE};
use h2pipe_hpack::HeaderField;
use h2pipe_transport::{
    duplex_pair, Accepted, ConnectionInfo, DuplexDriver, IpcStream, PipeReader, ReadResult,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::ConnectionOptions;
use crate::error::{ConnectionError, Result};
use crate::handler::{Handler, Request, Response, ResponseBody};
use crate::session::Session;
use crate::work_queue::{work_queue, WorkPoster, WorkReceiver};
use crate::writer::FrameWriter;

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Initializing,
    Active,
    Draining,
    ShuttingDown,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Initializing => "initializing",
            ConnectionState::Active => "active",
            ConnectionState::Draining => "draining",
            ConnectionState::ShuttingDown => "shutting-down",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Cloneable handle for requesting a graceful or forced close and for
/// observing the lifecycle.
#[derive(Debug, Clone)]
pub struct ConnectionControl {
    drain: CancellationToken,
    abort: CancellationToken,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl Default for ConnectionControl {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionControl {
    pub fn new() -> Self {
        Self {
            drain: CancellationToken::new(),
            abort: CancellationToken::new(),
            state: Arc::new(watch::Sender::new(ConnectionState::Initializing)),
        }
    }

    /// Stop accepting streams and close once in-flight ones finish.
    pub fn drain(&self) {
        self.drain.cancel();
    }

    /// Close now, cancelling in-flight streams.
    pub fn abort(&self) {
        self.abort.cancel();
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Wait until the connection reaches `state` or a later one.
    pub async fn wait_for(&self, state: ConnectionState) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|current| rank(*current) >= rank(state)).await;
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!(from = %current, to = %state, "connection state changed");
            *current = state;
            true
        });
    }
}

fn rank(state: ConnectionState) -> u8 {
    match state {
        ConnectionState::Initializing => 0,
        ConnectionState::Active => 1,
        ConnectionState::Draining => 2,
        ConnectionState::ShuttingDown => 3,
        ConnectionState::Closed => 4,
    }
}

/// How a connection ended.
#[derive(Debug)]
pub struct ConnectionOutcome {
    pub id: String,
    /// The state the connection closed from: `Draining` for a graceful
    /// close, `ShuttingDown` for a forced one.
    pub state: ConnectionState,
    /// Why it was forced closed, if it was.
    pub reason: Option<ConnectionError>,
    /// Unexpected I/O error recorded by the transport loops.
    pub transport_error: Option<Arc<io::Error>>,
    /// The response HPACK dynamic table at close, newest entry first.
    pub header_table: Vec<HeaderField>,
}

impl ConnectionOutcome {
    pub fn is_graceful(&self) -> bool {
        self.reason.is_none() && self.transport_error.is_none()
    }
}

/// An accepted connection that has not started serving.
#[derive(Debug)]
pub struct Connection {
    id: String,
    stream: IpcStream,
    info: ConnectionInfo,
}

impl Connection {
    pub fn new(id: impl Into<String>, accepted: Accepted) -> Self {
        Self {
            id: id.into(),
            stream: accepted.stream,
            info: accepted.info,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    pub fn into_stream(self) -> IpcStream {
        self.stream
    }

    /// Serve HTTP/2 on this connection until it closes.
    pub async fn serve<H: Handler>(
        self,
        handler: Arc<H>,
        options: ConnectionOptions,
        control: ConnectionControl,
    ) -> ConnectionOutcome {
        let span = info_span!(
            "connection",
            connection_id = %self.id,
            transport = self.stream.transport_name(),
        );
        self.run(handler, options, control).instrument(span).await
    }

    async fn run<H: Handler>(
        self,
        handler: Arc<H>,
        options: ConnectionOptions,
        control: ConnectionControl,
    ) -> ConnectionOutcome {
        let Connection { id, stream, info } = self;
        debug!(local = %info.local, remote = %info.remote, "connection started");

        let (transport, app) = duplex_pair(options.input_pipe, options.output_pipe);
        let mut driver = DuplexDriver::spawn(stream, transport);
        let (poster, work) = work_queue();
        let writer = FrameWriter::new(app.output, options.limits.header_table_size as usize);

        let mut protocol = Protocol {
            session: Session::new(writer, options.limits, poster),
            input: app.input,
            work,
            handler,
            tasks: JoinSet::new(),
            control: control.clone(),
            options,
            input_done: false,
        };

        let linger = options.drain_timeout;
        let result = protocol.serve().await;
        let last_state = control.state();
        let reason = match result {
            Ok(()) => None,
            Err(err) => {
                control.set_state(ConnectionState::ShuttingDown);
                protocol.shut_down(&err).await;
                Some(err)
            }
        };
        let header_table = protocol.session.writer().encoder().table().iter().cloned().collect();
        protocol.close();

        // Let the send loop write what is left, unless the close was forced
        // locally or the peer stopped reading.
        if matches!(reason, Some(ConnectionError::Aborted)) {
            driver.abort();
        }
        let transport_error = tokio::select! {
            reason = driver.join() => reason,
            _ = control.abort.cancelled() => {
                driver.abort();
                driver.join().await
            }
            _ = tokio::time::sleep(linger) => {
                debug!("output not drained in time");
                driver.abort();
                driver.join().await
            }
        };

        control.set_state(ConnectionState::Closed);
        let state = if reason.is_some() {
            ConnectionState::ShuttingDown
        } else {
            last_state
        };
        match &reason {
            None => info!(%state, "connection closed"),
            Some(err @ (ConnectionError::Aborted | ConnectionError::Timeout(_))) => {
                info!(%state, reason = %err, "connection closed")
            }
            Some(err) => warn!(%state, error = %err, "connection closed with error"),
        }
        ConnectionOutcome {
            id,
            state,
            reason,
            transport_error,
            header_table,
        }
    }
}

/// State owned by the protocol task.
struct Protocol<H> {
    session: Session,
    input: PipeReader,
    work: WorkReceiver<Session>,
    handler: Arc<H>,
    tasks: JoinSet<()>,
    control: ConnectionControl,
    options: ConnectionOptions,
    input_done: bool,
}

impl<H: Handler> Protocol<H> {
    /// Run until the connection closes gracefully or fails.
    async fn serve(&mut self) -> Result<()> {
        let mut keep_alive = Some(Instant::now() + self.options.keep_alive_timeout);
        self.session.start()?;
        self.flush().await?;
        let Some(rest) = self.read_preface(keep_alive).await? else {
            debug!(timeout = ?self.options.keep_alive_timeout, "no preface before keep-alive timeout");
            self.begin_drain()?;
            return self.flush().await;
        };
        self.control.set_state(ConnectionState::Active);
        self.on_input(rest)?;

        let mut drain_deadline: Option<Instant> = None;
        let mut headers_deadline: Option<Instant> = None;
        loop {
            self.dispatch();

            if drain_deadline.is_none() && (self.session.peer_went_away() || self.input_done) {
                drain_deadline = Some(self.begin_drain()?);
            }
            if drain_deadline.is_some() && self.session.active_streams() == 0 && self.tasks.is_empty()
            {
                self.flush_until(&mut drain_deadline).await?;
                debug!(
                    last_stream_id = self.session.last_accepted_stream_id(),
                    "drain complete"
                );
                return Ok(());
            }

            let awaiting_headers = self.session.awaiting_continuation();
            headers_deadline = match headers_deadline {
                Some(deadline) if awaiting_headers => Some(deadline),
                None if awaiting_headers => {
                    Some(Instant::now() + self.options.request_headers_timeout)
                }
                _ => None,
            };
            let idle = drain_deadline.is_none()
                && !awaiting_headers
                && self.session.active_streams() == 0
                && self.tasks.is_empty();
            keep_alive = match keep_alive {
                Some(deadline) if idle => Some(deadline),
                None if idle => Some(Instant::now() + self.options.keep_alive_timeout),
                _ => None,
            };

            let draining = drain_deadline.is_some();
            self.flush_until(&mut drain_deadline).await?;
            if drain_deadline.is_some() != draining {
                continue;
            }

            tokio::select! {
                biased;
                _ = self.control.abort.cancelled() => return Err(ConnectionError::Aborted),
                _ = tokio::time::sleep_until(drain_deadline.unwrap_or_else(Instant::now)),
                    if drain_deadline.is_some() =>
                {
                    return Err(ConnectionError::Timeout(self.options.drain_timeout));
                }
                _ = tokio::time::sleep_until(headers_deadline.unwrap_or_else(Instant::now)),
                    if headers_deadline.is_some() =>
                {
                    return Err(ConnectionError::protocol(
                        ErrorCode::InternalError,
                        "request headers timeout",
                    ));
                }
                _ = self.control.drain.cancelled(), if drain_deadline.is_none() => {
                    drain_deadline = Some(self.begin_drain()?);
                }
                _ = tokio::time::sleep_until(keep_alive.unwrap_or_else(Instant::now)),
                    if keep_alive.is_some() =>
                {
                    debug!(timeout = ?self.options.keep_alive_timeout, "keep-alive timeout");
                    keep_alive = None;
                    drain_deadline = Some(self.begin_drain()?);
                }
                Some(item) = self.work.recv() => {
                    item(&mut self.session);
                    while let Some(item) = self.work.try_recv() {
                        item(&mut self.session);
                    }
                    if let Some(err) = self.session.take_failure() {
                        return Err(err);
                    }
                }
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    if let Err(err) = joined {
                        if !err.is_cancelled() {
                            error!(error = %err, "stream task failed");
                        }
                    }
                }
                read = self.input.read(), if !self.input_done => {
                    self.on_input(read?)?;
                }
            }
        }
    }

    /// Wait for the 24-byte client preface. Returns whatever followed it in
    /// the same read, or `None` once `keep_alive` passes without it.
    async fn read_preface(&mut self, keep_alive: Option<Instant>) -> Result<Option<ReadResult>> {
        loop {
            let read = tokio::select! {
                _ = self.control.abort.cancelled() => return Err(ConnectionError::Aborted),
                _ = tokio::time::sleep_until(keep_alive.unwrap_or_else(Instant::now)),
                    if keep_alive.is_some() => return Ok(None),
                read = self.input.read() => read?,
            };
            let buffer = &read.buffer;
            let checked = buffer.len().min(CONNECTION_PREFACE.len());
            if buffer[..checked] != CONNECTION_PREFACE[..checked] {
                return Err(ConnectionError::protocol(
                    ErrorCode::ProtocolError,
                    "invalid connection preface",
                ));
            }
            if checked == CONNECTION_PREFACE.len() {
                self.input.advance(checked);
                return Ok(Some(ReadResult {
                    buffer: read.buffer.slice(checked..),
                    ..read
                }));
            }
            if read.is_completed {
                return Err(ConnectionError::protocol(
                    ErrorCode::ProtocolError,
                    "connection closed during preface",
                ));
            }
        }
    }

    fn on_input(&mut self, read: ReadResult) -> Result<()> {
        let consumed = self.session.consume(&read.buffer)?;
        self.input.advance(consumed);
        if read.is_completed {
            if consumed < read.buffer.len() {
                debug!(
                    trailing = read.buffer.len() - consumed,
                    "peer closed mid-frame"
                );
            }
            debug!("peer finished sending");
            self.input_done = true;
            self.session.end_of_input();
        }
        Ok(())
    }

    fn begin_drain(&mut self) -> Result<Instant> {
        self.control.set_state(ConnectionState::Draining);
        self.session.begin_drain()?;
        debug!(
            active_streams = self.session.active_streams(),
            timeout = ?self.options.drain_timeout,
            "draining"
        );
        Ok(Instant::now() + self.options.drain_timeout)
    }

    /// Spawn a task for every newly decoded request.
    fn dispatch(&mut self) {
        for request in self.session.take_ready() {
            let stream_id = request.stream_id;
            let handler = Arc::clone(&self.handler);
            let poster = self.session.poster();
            let task = self
                .tasks
                .spawn(serve_stream(handler, request, poster).in_current_span());
            self.session.attach_task(stream_id, task);
        }
    }

    /// Publish written frames, waiting out backpressure unless aborted.
    async fn flush(&self) -> Result<()> {
        tokio::select! {
            _ = self.control.abort.cancelled() => Err(ConnectionError::Aborted),
            flushed = self.session.writer().flush() => flushed.map(|_| ()),
        }
    }

    /// Like [`flush`](Self::flush), but a drain request still starts the
    /// drain and an expired drain deadline ends the wait, so a peer that
    /// stops reading cannot hold the connection open.
    async fn flush_until(&mut self, drain_deadline: &mut Option<Instant>) -> Result<()> {
        loop {
            tokio::select! {
                biased;
                _ = self.control.abort.cancelled() => return Err(ConnectionError::Aborted),
                _ = tokio::time::sleep_until(drain_deadline.unwrap_or_else(Instant::now)),
                    if drain_deadline.is_some() =>
                {
                    return Err(ConnectionError::Timeout(self.options.drain_timeout));
                }
                _ = self.control.drain.cancelled(), if drain_deadline.is_none() => {
                    *drain_deadline = Some(self.begin_drain()?);
                }
                flushed = self.session.writer().flush() => return flushed.map(|_| ()),
            }
        }
    }

    /// Cancel every stream and tell the peer why, best effort.
    async fn shut_down(&mut self, err: &ConnectionError) {
        self.tasks.abort_all();
        self.session.abort_streams();
        if matches!(err, ConnectionError::Pipe(_) | ConnectionError::Transport(_)) {
            return;
        }
        if self.session.send_error(err).is_err() {
            return;
        }
        let grace = self.options.drain_timeout.min(std::time::Duration::from_secs(1));
        if tokio::time::timeout(grace, self.flush()).await.is_err() {
            debug!("peer not reading; dropping GOAWAY");
        }
    }

    fn close(&mut self) {
        self.tasks.abort_all();
        self.work.close();
        self.input.complete();
        self.session.writer().complete();
        debug!(
            settings_acked = self.session.settings_acked(),
            header_table_size = self.session.decoder().table().size(),
            "protocol loop finished"
        );
    }
}

/// Run the handler for one stream and hand its response back to the
/// protocol task.
async fn serve_stream<H: Handler>(handler: Arc<H>, request: Request, poster: WorkPoster<Session>) {
    let stream_id = request.stream_id;
    let response = match AssertUnwindSafe(handler.handle(request)).catch_unwind().await {
        Ok(response) => response,
        Err(_) => {
            error!(stream_id, "handler panicked");
            poster.post(move |session: &mut Session| {
                let _ = session.reset_stream(stream_id, ErrorCode::InternalError);
            });
            return;
        }
    };
    send_response(stream_id, response, &poster).await;
}

async fn send_response(stream_id: u32, response: Response, poster: &WorkPoster<Session>) {
    let Response {
        status,
        headers,
        body,
    } = response;

    match body {
        ResponseBody::Empty => {
            poster.post(move |session: &mut Session| {
                session.send_headers(stream_id, status, headers, true);
            });
        }
        ResponseBody::Full(data) if data.is_empty() => {
            poster.post(move |session: &mut Session| {
                session.send_headers(stream_id, status, headers, true);
            });
        }
        ResponseBody::Full(data) => {
            poster.post(move |session: &mut Session| {
                if session.send_headers(stream_id, status, headers, false) {
                    session.queue_data(stream_id, data, true, None);
                }
            });
        }
        ResponseBody::Stream(chunks) => {
            let started = poster
                .call(move |session: &mut Session| {
                    session.send_headers(stream_id, status, headers, false)
                })
                .await;
            if started == Some(true) {
                stream_body(stream_id, chunks, poster).await;
            }
        }
    }
}

/// Forward streamed chunks one at a time, waiting for each to be written so
/// a slow peer slows the producer.
async fn stream_body(stream_id: u32, mut chunks: mpsc::Receiver<Bytes>, poster: &WorkPoster<Session>) {
    while let Some(chunk) = chunks.recv().await {
        if chunk.is_empty() {
            continue;
        }
        let (done_tx, done_rx) = oneshot::channel();
        let posted = poster.post(move |session: &mut Session| {
            session.queue_data(stream_id, chunk, false, Some(done_tx));
        });
        if !posted || !matches!(done_rx.await, Ok(true)) {
            debug!(stream_id, "stream reset while sending body");
            return;
        }
    }
    poster.post(move |session: &mut Session| {
        session.queue_data(stream_id, Bytes::new(), true, None);
    });
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::BytesMut;
    use h2pipe_frame::payload::{parse_goaway, write_window_update};
    use h2pipe_frame::settings::write_settings;
    use h2pipe_frame::{
        try_parse_frame, write_frame, Flags, FrameType, OwnedFrame, SettingId, MAX_WINDOW_SIZE,
    };
    use h2pipe_hpack::Encoder;
    use h2pipe_transport::ConnectionInfo;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::sync::Notify;
    use tokio::task::JoinHandle;

    use super::*;
    use crate::client::{ClientRequest, ClientSession};
    use crate::handler::handler_fn;

    fn spawn_connection<H: Handler>(
        handler: H,
        control: ConnectionControl,
    ) -> (DuplexStream, JoinHandle<ConnectionOutcome>) {
        let options = ConnectionOptions {
            drain_timeout: Duration::from_secs(2),
            ..ConnectionOptions::default()
        };
        spawn_with(handler, control, options, 64 * 1024)
    }

    fn spawn_with<H: Handler>(
        handler: H,
        control: ConnectionControl,
        options: ConnectionOptions,
        buffer: usize,
    ) -> (DuplexStream, JoinHandle<ConnectionOutcome>) {
        let (client, server) = tokio::io::duplex(buffer);
        let connection = Connection::new(
            "conn-test",
            Accepted {
                stream: IpcStream::from_memory(server),
                info: ConnectionInfo::new("memory:test", "memory:client"),
            },
        );
        let task = tokio::spawn(connection.serve(Arc::new(handler), options, control));
        (client, task)
    }

    fn hello() -> impl Handler {
        handler_fn(|_request: Request| async { Response::text("hello") })
    }

    /// Preface, SETTINGS and a GET on stream 1. Without `end_headers` the
    /// header block is left waiting for CONTINUATION.
    fn raw_request(settings: &[(SettingId, u32)], end_headers: bool) -> BytesMut {
        let mut out = BytesMut::from(&CONNECTION_PREFACE[..]);
        write_settings(settings, &mut out).unwrap();
        let fields = [
            HeaderField::new(&b":method"[..], &b"GET"[..]),
            HeaderField::new(&b":scheme"[..], &b"http"[..]),
            HeaderField::new(&b":path"[..], &b"/"[..]),
        ];
        let mut block = BytesMut::new();
        Encoder::new(4096).encode(&fields, &mut block);
        let mut flags = Flags::END_STREAM;
        if end_headers {
            flags.insert(Flags::END_HEADERS);
        }
        write_frame(FrameType::Headers, flags, 1, &block, 16_384, &mut out).unwrap();
        out
    }

    /// Everything the server wrote, read until it closes its side.
    async fn read_frames(client: &mut DuplexStream) -> Vec<OwnedFrame> {
        let mut written = Vec::new();
        client.read_to_end(&mut written).await.unwrap();
        let mut frames = Vec::new();
        let mut rest = &written[..];
        while let Some((frame, used)) = try_parse_frame(rest, 1 << 24).unwrap() {
            frames.push(frame.to_owned_frame());
            rest = &rest[used..];
        }
        frames
    }

    fn goaway_code(frames: &[OwnedFrame]) -> ErrorCode {
        let goaway = frames
            .iter()
            .find(|frame| frame.kind() == FrameType::GoAway)
            .expect("the server should send GOAWAY before closing");
        parse_goaway(&goaway.payload).unwrap().error_code
    }

    #[tokio::test]
    async fn invalid_preface_fails_with_protocol_error() {
        let control = ConnectionControl::new();
        let (mut client, task) = spawn_connection(hello(), control.clone());

        client
            .write_all(b"GET / HTTP/1.1\r\nHost: example\r\n\r\n")
            .await
            .unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("connection should close")
            .expect("connection task should not panic");

        assert_eq!(outcome.state, ConnectionState::ShuttingDown);
        match outcome.reason {
            Some(ConnectionError::Protocol { code, .. }) => {
                assert_eq!(code, ErrorCode::ProtocolError)
            }
            other => panic!("expected protocol error, got {other:?}"),
        }
        assert_eq!(control.state(), ConnectionState::Closed);

        // SETTINGS went out before the preface was checked, GOAWAY after.
        let mut written = Vec::new();
        client.read_to_end(&mut written).await.unwrap();
        assert!(written.len() > 9);
    }

    #[tokio::test]
    async fn drain_request_closes_gracefully() {
        let control = ConnectionControl::new();
        let (client, task) = spawn_connection(hello(), control.clone());

        let mut session = ClientSession::connect(client)
            .await
            .expect("handshake should succeed");
        let response = session
            .request(ClientRequest::get("/"))
            .await
            .expect("request should succeed");
        assert_eq!(response.status, 200);
        assert_eq!(response.body, Bytes::from_static(b"hello"));

        control.wait_for(ConnectionState::Active).await;
        control.drain();
        let outcome = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("connection should close")
            .expect("connection task should not panic");

        assert!(outcome.is_graceful(), "unexpected outcome: {outcome:?}");
        assert_eq!(outcome.state, ConnectionState::Draining);
        assert_eq!(outcome.id, "conn-test");
    }

    #[tokio::test]
    async fn peer_eof_drains() {
        let control = ConnectionControl::new();
        let (client, task) = spawn_connection(hello(), control.clone());

        let session = ClientSession::connect(client)
            .await
            .expect("handshake should succeed");
        drop(session);

        let outcome = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("connection should close")
            .expect("connection task should not panic");
        assert!(outcome.reason.is_none());
        assert_eq!(outcome.state, ConnectionState::Draining);
    }

    #[tokio::test]
    async fn abort_cancels_in_flight_streams() {
        let started = Arc::new(Notify::new());
        let handler = {
            let started = Arc::clone(&started);
            handler_fn(move |_request: Request| {
                let started = Arc::clone(&started);
                async move {
                    started.notify_one();
                    std::future::pending::<()>().await;
                    Response::ok()
                }
            })
        };
        let control = ConnectionControl::new();
        let (client, task) = spawn_connection(handler, control.clone());

        let mut session = ClientSession::connect(client)
            .await
            .expect("handshake should succeed");
        let request = tokio::spawn(async move { session.request(ClientRequest::get("/slow")).await });
        started.notified().await;

        control.abort();
        let outcome = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("abort should close the connection")
            .expect("connection task should not panic");
        assert!(matches!(outcome.reason, Some(ConnectionError::Aborted)));
        assert_eq!(outcome.state, ConnectionState::ShuttingDown);

        let result = tokio::time::timeout(Duration::from_secs(2), request)
            .await
            .expect("client should observe the close")
            .expect("client task should not panic");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn drain_deadline_holds_while_peer_stops_reading() {
        let responded = Arc::new(Notify::new());
        let handler = {
            let responded = Arc::clone(&responded);
            handler_fn(move |_request: Request| {
                let responded = Arc::clone(&responded);
                async move {
                    responded.notify_one();
                    Response::ok().with_body(vec![b'x'; 1 << 20])
                }
            })
        };
        let control = ConnectionControl::new();
        let options = ConnectionOptions {
            drain_timeout: Duration::from_millis(200),
            ..ConnectionOptions::default()
        };
        let (mut client, task) = spawn_with(handler, control.clone(), options, 1024);

        let mut hello = raw_request(&[(SettingId::InitialWindowSize, MAX_WINDOW_SIZE)], true);
        write_window_update(0, MAX_WINDOW_SIZE - 65_535, &mut hello).unwrap();
        client.write_all(&hello).await.unwrap();
        responded.notified().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The client never reads, so the response stalls the output.
        control.drain();
        let outcome = tokio::time::timeout(Duration::from_secs(3), task)
            .await
            .expect("a stalled flush should not outlive the drain deadline")
            .expect("connection task should not panic");
        assert!(
            matches!(outcome.reason, Some(ConnectionError::Timeout(_))),
            "unexpected outcome: {outcome:?}"
        );
        assert_eq!(outcome.state, ConnectionState::ShuttingDown);
        assert_eq!(control.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_preface_closes_after_keep_alive() {
        let control = ConnectionControl::new();
        let options = ConnectionOptions {
            keep_alive_timeout: Duration::from_secs(10),
            ..ConnectionOptions::default()
        };
        let started = Instant::now();
        let (mut client, task) = spawn_with(hello(), control.clone(), options, 64 * 1024);

        let outcome = tokio::time::timeout(Duration::from_secs(60), task)
            .await
            .expect("an idle connection should close on keep-alive")
            .expect("connection task should not panic");
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert!(outcome.is_graceful(), "unexpected outcome: {outcome:?}");
        assert_eq!(outcome.state, ConnectionState::Draining);

        let frames = read_frames(&mut client).await;
        assert_eq!(goaway_code(&frames), ErrorCode::NoError);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_after_last_stream_closes_after_keep_alive() {
        let control = ConnectionControl::new();
        let options = ConnectionOptions {
            keep_alive_timeout: Duration::from_secs(10),
            ..ConnectionOptions::default()
        };
        let (client, task) = spawn_with(hello(), control.clone(), options, 64 * 1024);

        let mut session = ClientSession::connect(client)
            .await
            .expect("handshake should succeed");
        let response = session
            .request(ClientRequest::get("/"))
            .await
            .expect("request should succeed");
        assert_eq!(response.status, 200);
        let finished = Instant::now();

        let outcome = tokio::time::timeout(Duration::from_secs(60), task)
            .await
            .expect("an idle connection should close on keep-alive")
            .expect("connection task should not panic");
        assert!(finished.elapsed() >= Duration::from_secs(10));
        assert!(outcome.is_graceful(), "unexpected outcome: {outcome:?}");
        assert_eq!(outcome.state, ConnectionState::Draining);
    }

    #[tokio::test(start_paused = true)]
    async fn unfinished_header_block_times_out() {
        let control = ConnectionControl::new();
        let options = ConnectionOptions {
            keep_alive_timeout: Duration::from_secs(60),
            request_headers_timeout: Duration::from_secs(5),
            ..ConnectionOptions::default()
        };
        let started = Instant::now();
        let (mut client, task) = spawn_with(hello(), control.clone(), options, 64 * 1024);

        client.write_all(&raw_request(&[], false)).await.unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(120), task)
            .await
            .expect("an unfinished header block should time out")
            .expect("connection task should not panic");
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(5) && elapsed < Duration::from_secs(60));
        match outcome.reason {
            Some(ConnectionError::Protocol { code, .. }) => {
                assert_eq!(code, ErrorCode::InternalError)
            }
            other => panic!("expected request headers timeout, got {other:?}"),
        }

        let frames = read_frames(&mut client).await;
        assert_eq!(goaway_code(&frames), ErrorCode::InternalError);
    }
}
