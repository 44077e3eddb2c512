//! Frame-level protocol state of one server connection.
//!
//! A [`Session`] is owned by the connection's protocol task. It consumes
//! parsed frames, tracks streams and flow control, and writes responses that
//! stream tasks hand over through the work queue.

use std::collections::{BTreeMap, VecDeque};

use bytes::{Bytes, BytesMut};
use h2pipe_frame::payload::{
    parse_goaway, parse_headers, parse_ping, parse_priority, parse_rst_stream,
    parse_window_update, strip_padding,
};
use h2pipe_frame::settings::parse_settings;
use h2pipe_frame::{
    try_parse_frame, ErrorCode, Flags, Frame, FrameType, SettingId, Settings,
    DEFAULT_INITIAL_WINDOW_SIZE,
};
use h2pipe_hpack::{Decoder, HeaderField};
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::{debug, info, trace, warn};

use crate::config::Http2Limits;
use crate::error::{ConnectionError, FlowControlError, Result};
use crate::flow::{WindowTarget, WindowTracker};
use crate::handler::{Request, RequestBody};
use crate::stream::StreamState;
use crate::work_queue::WorkPoster;
use crate::writer::FrameWriter;

/// Headers that are meaningless in HTTP/2 and make a request malformed.
const CONNECTION_SPECIFIC_HEADERS: [&[u8]; 5] = [
    b"connection",
    b"keep-alive",
    b"proxy-connection",
    b"transfer-encoding",
    b"upgrade",
];

struct PendingHeaders {
    stream_id: u32,
    end_stream: bool,
    self_dependent: bool,
    block: BytesMut,
}

struct Outbound {
    data: Bytes,
    end_stream: bool,
    /// Fires with `true` once every byte is written, `false` on reset.
    done: Option<oneshot::Sender<bool>>,
}

struct StreamEntry {
    state: StreamState,
    body: Option<mpsc::UnboundedSender<Bytes>>,
    outbound: VecDeque<Outbound>,
    task: Option<AbortHandle>,
}

impl StreamEntry {
    fn new(state: StreamState) -> Self {
        Self {
            state,
            body: None,
            outbound: VecDeque::new(),
            task: None,
        }
    }
}

/// Protocol state of one connection.
pub(crate) struct Session {
    writer: FrameWriter,
    decoder: Decoder,
    flow: WindowTracker,
    limits: Http2Limits,
    peer_settings: Settings,
    streams: BTreeMap<u32, StreamEntry>,
    /// Highest client stream id seen; anything above is idle.
    highest_stream_id: u32,
    /// Highest stream id handed to the application, reported in GOAWAY.
    last_accepted_stream_id: u32,
    header_block: Option<PendingHeaders>,
    poster: WorkPoster<Session>,
    ready: Vec<Request>,
    accepting: bool,
    goaway_sent: bool,
    peer_went_away: bool,
    received_settings: bool,
    settings_acked: bool,
    /// Write failure from deferred work, surfaced by the protocol loop.
    failure: Option<ConnectionError>,
}

impl Session {
    pub(crate) fn new(writer: FrameWriter, limits: Http2Limits, poster: WorkPoster<Session>) -> Self {
        let connection_window = limits.connection_window.max(DEFAULT_INITIAL_WINDOW_SIZE);
        Self {
            writer,
            decoder: Decoder::new(limits.header_table_size as usize),
            flow: WindowTracker::new(
                DEFAULT_INITIAL_WINDOW_SIZE,
                limits.initial_stream_window,
                connection_window,
            ),
            limits,
            peer_settings: Settings::default(),
            streams: BTreeMap::new(),
            highest_stream_id: 0,
            last_accepted_stream_id: 0,
            header_block: None,
            poster,
            ready: Vec::new(),
            accepting: true,
            goaway_sent: false,
            peer_went_away: false,
            received_settings: false,
            settings_acked: false,
            failure: None,
        }
    }

    /// Write the server preface: SETTINGS, then a connection WINDOW_UPDATE
    /// when the configured window exceeds the protocol default.
    pub(crate) fn start(&mut self) -> Result<()> {
        self.writer
            .settings(&self.limits.local_settings().non_default())?;
        let connection_window = self.limits.connection_window;
        if connection_window > DEFAULT_INITIAL_WINDOW_SIZE {
            self.writer
                .window_update(0, connection_window - DEFAULT_INITIAL_WINDOW_SIZE)?;
        }
        Ok(())
    }

    pub(crate) fn writer(&self) -> &FrameWriter {
        &self.writer
    }

    pub(crate) fn poster(&self) -> WorkPoster<Session> {
        self.poster.clone()
    }

    /// Requests decoded since the last call, ready for dispatch.
    pub(crate) fn take_ready(&mut self) -> Vec<Request> {
        std::mem::take(&mut self.ready)
    }

    pub(crate) fn take_failure(&mut self) -> Option<ConnectionError> {
        self.failure.take()
    }

    pub(crate) fn peer_went_away(&self) -> bool {
        self.peer_went_away
    }

    /// A HEADERS frame arrived without END_HEADERS and its CONTINUATION
    /// frames are still outstanding.
    pub(crate) fn awaiting_continuation(&self) -> bool {
        self.header_block.is_some()
    }

    pub(crate) fn active_streams(&self) -> usize {
        self.streams.len()
    }

    pub(crate) fn last_accepted_stream_id(&self) -> u32 {
        self.last_accepted_stream_id
    }

    pub(crate) fn settings_acked(&self) -> bool {
        self.settings_acked
    }

    pub(crate) fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    /// Record the handler task serving a stream so a reset can cancel it.
    pub(crate) fn attach_task(&mut self, stream_id: u32, task: AbortHandle) {
        match self.streams.get_mut(&stream_id) {
            Some(entry) => entry.task = Some(task),
            None => task.abort(),
        }
    }

    /// Parse and handle every complete frame in `buffer`. Returns the number
    /// of bytes consumed; a trailing partial frame is left for the next read.
    pub(crate) fn consume(&mut self, buffer: &Bytes) -> Result<usize> {
        let max_frame_size = self.limits.max_frame_size as usize;
        let mut consumed = 0;
        while let Some((frame, used)) = try_parse_frame(&buffer[consumed..], max_frame_size)? {
            trace!(
                frame_type = %frame.kind(),
                stream_id = frame.stream_id(),
                length = frame.payload.len(),
                "frame received"
            );
            self.on_frame(frame, buffer)?;
            consumed += used;
        }
        Ok(consumed)
    }

    fn on_frame(&mut self, frame: Frame<'_>, buffer: &Bytes) -> Result<()> {
        if !self.received_settings
            && (frame.kind() != FrameType::Settings || frame.flags().contains(Flags::ACK))
        {
            return Err(ConnectionError::protocol(
                ErrorCode::ProtocolError,
                "first frame must be SETTINGS",
            ));
        }
        if let Some(pending) = &self.header_block {
            if frame.kind() != FrameType::Continuation || frame.stream_id() != pending.stream_id {
                return Err(ConnectionError::protocol(
                    ErrorCode::ProtocolError,
                    format!("expected CONTINUATION for stream {}", pending.stream_id),
                ));
            }
        }

        let result = match frame.kind() {
            FrameType::Data => self.on_data(frame, buffer),
            FrameType::Headers => self.on_headers(frame),
            FrameType::Priority => self.on_priority(frame),
            FrameType::RstStream => self.on_rst_stream(frame),
            FrameType::Settings => self.on_settings(frame),
            FrameType::PushPromise => Err(ConnectionError::protocol(
                ErrorCode::ProtocolError,
                "PUSH_PROMISE received from client",
            )),
            FrameType::Ping => self.on_ping(frame),
            FrameType::GoAway => self.on_goaway(frame),
            FrameType::WindowUpdate => self.on_window_update(frame),
            FrameType::Continuation => self.on_continuation(frame),
            FrameType::Unknown(kind) => {
                trace!(kind, "ignoring unknown frame type");
                Ok(())
            }
        };

        match result {
            Err(ConnectionError::Stream { id, code, reason }) => {
                debug!(stream_id = id, %code, %reason, "stream error");
                self.reset_stream(id, code)
            }
            other => other,
        }
    }

    fn on_data(&mut self, frame: Frame<'_>, buffer: &Bytes) -> Result<()> {
        let id = frame.stream_id();
        if id == 0 {
            return Err(ConnectionError::protocol(
                ErrorCode::ProtocolError,
                "DATA on stream 0",
            ));
        }
        let flow_len = frame.payload.len() as u32;
        let data = strip_padding(FrameType::Data, frame.flags(), frame.payload)?;

        let Some(entry) = self.streams.get(&id) else {
            if id > self.highest_stream_id {
                return Err(ConnectionError::protocol(
                    ErrorCode::ProtocolError,
                    format!("DATA on idle stream {id}"),
                ));
            }
            self.flow.on_data_received(id, flow_len)?;
            self.release_window(id, flow_len);
            return Err(ConnectionError::stream(
                id,
                ErrorCode::StreamClosed,
                "DATA on closed stream",
            ));
        };
        let state = entry.state;
        if !state.can_recv() {
            self.flow.on_data_received(id, flow_len)?;
            self.release_window(id, flow_len);
            return Err(ConnectionError::stream(
                id,
                ErrorCode::StreamClosed,
                format!("DATA on {state} stream"),
            ));
        }

        self.receive_data(id, flow_len)?;
        let padding = flow_len - data.len() as u32;
        if padding > 0 {
            self.release_window(id, padding);
        }
        if !data.is_empty() {
            let chunk = buffer.slice_ref(data);
            let delivered = self
                .streams
                .get(&id)
                .and_then(|entry| entry.body.as_ref())
                .is_some_and(|body| body.send(chunk).is_ok());
            if !delivered {
                self.release_window(id, data.len() as u32);
            }
        }
        if frame.flags().contains(Flags::END_STREAM) {
            self.recv_end_stream(id);
        }
        Ok(())
    }

    /// Charge DATA to the receive windows. A stream that overruns its window
    /// is reset, so its share of the connection window is returned at once.
    fn receive_data(&mut self, id: u32, len: u32) -> Result<()> {
        match self.flow.on_data_received(id, len) {
            Err(err @ FlowControlError::StreamReceiveExceeded { .. }) => {
                self.flow.remove_stream(id);
                self.release_window(id, len);
                Err(err.into())
            }
            other => Ok(other?),
        }
    }

    fn on_headers(&mut self, frame: Frame<'_>) -> Result<()> {
        let id = frame.stream_id();
        if id == 0 {
            return Err(ConnectionError::protocol(
                ErrorCode::ProtocolError,
                "HEADERS on stream 0",
            ));
        }
        if id % 2 == 0 {
            return Err(ConnectionError::protocol(
                ErrorCode::ProtocolError,
                format!("HEADERS on even stream id {id}"),
            ));
        }
        let flags = frame.flags();
        let headers = parse_headers(flags, frame.payload)?;
        let pending = PendingHeaders {
            stream_id: id,
            end_stream: flags.contains(Flags::END_STREAM),
            self_dependent: headers.priority.is_some_and(|p| p.dependency == id),
            block: BytesMut::from(headers.fragment),
        };
        if flags.contains(Flags::END_HEADERS) {
            self.finish_headers(pending)
        } else {
            self.header_block = Some(pending);
            Ok(())
        }
    }

    fn on_continuation(&mut self, frame: Frame<'_>) -> Result<()> {
        let Some(mut pending) = self.header_block.take() else {
            return Err(ConnectionError::protocol(
                ErrorCode::ProtocolError,
                "CONTINUATION without a header block",
            ));
        };
        pending.block.extend_from_slice(frame.payload);
        if pending.block.len() > 2 * self.limits.max_header_list_size as usize {
            return Err(ConnectionError::protocol(
                ErrorCode::EnhanceYourCalm,
                "header block too large",
            ));
        }
        if frame.flags().contains(Flags::END_HEADERS) {
            self.finish_headers(pending)
        } else {
            self.header_block = Some(pending);
            Ok(())
        }
    }

    fn finish_headers(&mut self, pending: PendingHeaders) -> Result<()> {
        let id = pending.stream_id;
        let fields = self.decoder.decode(&pending.block.freeze())?;

        if let Some(entry) = self.streams.get(&id) {
            if !entry.state.can_recv() {
                return Err(ConnectionError::stream(
                    id,
                    ErrorCode::StreamClosed,
                    format!("HEADERS on {} stream", entry.state),
                ));
            }
            if !pending.end_stream {
                return Err(ConnectionError::stream(
                    id,
                    ErrorCode::ProtocolError,
                    "trailers without END_STREAM",
                ));
            }
            if fields.iter().any(|f| f.name.starts_with(b":")) {
                return Err(ConnectionError::stream(
                    id,
                    ErrorCode::ProtocolError,
                    "pseudo-header in trailers",
                ));
            }
            self.recv_end_stream(id);
            return Ok(());
        }

        if id <= self.highest_stream_id {
            return Err(ConnectionError::protocol(
                ErrorCode::StreamClosed,
                format!("HEADERS on closed stream {id}"),
            ));
        }
        self.highest_stream_id = id;

        if pending.self_dependent {
            return Err(ConnectionError::stream(
                id,
                ErrorCode::ProtocolError,
                "stream depends on itself",
            ));
        }
        if !self.accepting {
            return Err(ConnectionError::stream(
                id,
                ErrorCode::RefusedStream,
                "connection is draining",
            ));
        }
        if self.streams.len() >= self.limits.max_concurrent_streams as usize {
            return Err(ConnectionError::stream(
                id,
                ErrorCode::RefusedStream,
                "too many concurrent streams",
            ));
        }

        let list_size: usize = fields.iter().map(HeaderField::size).sum();
        let parts = RequestParts::parse(id, fields)?;

        self.last_accepted_stream_id = id;
        self.flow.add_stream(id);
        let state = if pending.end_stream {
            StreamState::HalfClosedRemote
        } else {
            StreamState::Open
        };
        let mut entry = StreamEntry::new(state);

        if list_size > self.limits.max_header_list_size as usize {
            debug!(stream_id = id, list_size, "request header list too large");
            self.streams.insert(id, entry);
            self.send_headers(id, 431, Vec::new(), true);
            return self.take_failure().map_or(Ok(()), Err);
        }

        let body = if pending.end_stream {
            RequestBody::empty()
        } else {
            let (tx, body) = RequestBody::channel(id, self.poster.clone());
            entry.body = Some(tx);
            body
        };
        self.streams.insert(id, entry);
        debug!(stream_id = id, method = %parts.method, path = %parts.path, "request received");
        self.ready.push(Request {
            stream_id: id,
            method: parts.method,
            path: parts.path,
            scheme: parts.scheme,
            authority: parts.authority,
            headers: parts.headers,
            body,
        });
        Ok(())
    }

    fn on_priority(&mut self, frame: Frame<'_>) -> Result<()> {
        let id = frame.stream_id();
        if id == 0 {
            return Err(ConnectionError::protocol(
                ErrorCode::ProtocolError,
                "PRIORITY on stream 0",
            ));
        }
        if frame.payload.len() != 5 {
            return Err(ConnectionError::stream(
                id,
                ErrorCode::FrameSizeError,
                "PRIORITY must be 5 bytes",
            ));
        }
        let spec = parse_priority(frame.payload)?;
        if spec.dependency == id {
            return Err(ConnectionError::stream(
                id,
                ErrorCode::ProtocolError,
                "stream depends on itself",
            ));
        }
        Ok(())
    }

    fn on_rst_stream(&mut self, frame: Frame<'_>) -> Result<()> {
        let id = frame.stream_id();
        if id == 0 {
            return Err(ConnectionError::protocol(
                ErrorCode::ProtocolError,
                "RST_STREAM on stream 0",
            ));
        }
        let code = parse_rst_stream(frame.payload)?;
        if id > self.highest_stream_id {
            return Err(ConnectionError::protocol(
                ErrorCode::ProtocolError,
                format!("RST_STREAM on idle stream {id}"),
            ));
        }
        if self.streams.contains_key(&id) {
            debug!(stream_id = id, %code, "stream reset by peer");
            self.close_stream(id, true);
        }
        Ok(())
    }

    fn on_settings(&mut self, frame: Frame<'_>) -> Result<()> {
        if frame.stream_id() != 0 {
            return Err(ConnectionError::protocol(
                ErrorCode::ProtocolError,
                "SETTINGS on a stream",
            ));
        }
        if frame.flags().contains(Flags::ACK) {
            if !frame.payload.is_empty() {
                return Err(ConnectionError::protocol(
                    ErrorCode::FrameSizeError,
                    "SETTINGS ack with payload",
                ));
            }
            self.settings_acked = true;
            return Ok(());
        }

        for (id, value) in parse_settings(frame.payload)? {
            self.peer_settings.apply(id, value)?;
            match id {
                SettingId::InitialWindowSize => self.flow.on_settings_change(value)?,
                SettingId::MaxFrameSize => self.writer.set_max_frame_size(value as usize),
                SettingId::HeaderTableSize => self
                    .writer
                    .set_header_table_size(value as usize, self.limits.header_table_size as usize),
                _ => {}
            }
        }
        self.received_settings = true;
        self.writer.settings_ack()?;
        self.pump();
        self.take_failure().map_or(Ok(()), Err)
    }

    fn on_ping(&mut self, frame: Frame<'_>) -> Result<()> {
        if frame.stream_id() != 0 {
            return Err(ConnectionError::protocol(
                ErrorCode::ProtocolError,
                "PING on a stream",
            ));
        }
        let data = parse_ping(frame.payload)?;
        if !frame.flags().contains(Flags::ACK) {
            self.writer.ping_ack(data)?;
        }
        Ok(())
    }

    fn on_goaway(&mut self, frame: Frame<'_>) -> Result<()> {
        if frame.stream_id() != 0 {
            return Err(ConnectionError::protocol(
                ErrorCode::ProtocolError,
                "GOAWAY on a stream",
            ));
        }
        let goaway = parse_goaway(frame.payload)?;
        info!(
            last_stream_id = goaway.last_stream_id,
            code = %goaway.error_code,
            "peer sent GOAWAY"
        );
        self.peer_went_away = true;
        Ok(())
    }

    fn on_window_update(&mut self, frame: Frame<'_>) -> Result<()> {
        let id = frame.stream_id();
        let increment = parse_window_update(frame.payload)?;
        if increment == 0 {
            return Err(if id == 0 {
                ConnectionError::protocol(ErrorCode::ProtocolError, "zero window increment")
            } else {
                ConnectionError::stream(id, ErrorCode::ProtocolError, "zero window increment")
            });
        }
        let target = if id == 0 {
            WindowTarget::Connection
        } else if id > self.highest_stream_id {
            return Err(ConnectionError::protocol(
                ErrorCode::ProtocolError,
                format!("WINDOW_UPDATE on idle stream {id}"),
            ));
        } else {
            WindowTarget::Stream(id)
        };
        self.flow.on_window_update(target, increment)?;
        self.pump();
        self.take_failure().map_or(Ok(()), Err)
    }

    fn recv_end_stream(&mut self, id: u32) {
        let Some(entry) = self.streams.get_mut(&id) else {
            return;
        };
        entry.body = None;
        if let Some(next) = entry.state.recv_end_stream() {
            entry.state = next;
        }
        if entry.state == StreamState::Closed {
            self.close_stream(id, false);
        }
    }

    /// Remove a stream, failing its pending sends. `abort` also cancels the
    /// handler task.
    fn close_stream(&mut self, id: u32, abort: bool) {
        let Some(entry) = self.streams.remove(&id) else {
            return;
        };
        self.flow.remove_stream(id);
        for outbound in entry.outbound {
            if let Some(done) = outbound.done {
                let _ = done.send(false);
            }
        }
        if abort {
            if let Some(task) = entry.task {
                task.abort();
            }
        }
        trace!(stream_id = id, "stream closed");
    }

    /// Send RST_STREAM and forget the stream.
    pub(crate) fn reset_stream(&mut self, id: u32, code: ErrorCode) -> Result<()> {
        self.close_stream(id, true);
        self.writer.rst_stream(id, code)
    }

    /// Stop accepting streams and announce it with GOAWAY(NO_ERROR).
    pub(crate) fn begin_drain(&mut self) -> Result<()> {
        self.accepting = false;
        if self.goaway_sent {
            return Ok(());
        }
        self.goaway_sent = true;
        self.writer
            .goaway(self.last_accepted_stream_id, ErrorCode::NoError, &[])
    }

    /// Report a connection error to the peer, once.
    pub(crate) fn send_error(&mut self, err: &ConnectionError) -> Result<()> {
        self.accepting = false;
        if self.goaway_sent && err.error_code() == ErrorCode::NoError {
            return Ok(());
        }
        self.goaway_sent = true;
        let reason = err.to_string();
        self.writer
            .goaway(self.last_accepted_stream_id, err.error_code(), reason.as_bytes())
    }

    /// The peer stopped sending. Request bodies still open are ended.
    pub(crate) fn end_of_input(&mut self) {
        for entry in self.streams.values_mut() {
            entry.body = None;
        }
    }

    /// Cancel every stream.
    pub(crate) fn abort_streams(&mut self) {
        let ids: Vec<u32> = self.streams.keys().copied().collect();
        for id in ids {
            self.close_stream(id, true);
        }
    }

    /// Return consumed request bytes to the peer.
    pub(crate) fn release_window(&mut self, stream_id: u32, len: u32) {
        for (target, increment) in self.flow.release(stream_id, len) {
            if let Err(err) = self.writer.window_update(target.stream_id(), increment) {
                self.failure.get_or_insert(err);
                return;
            }
        }
    }

    /// Write response HEADERS. Returns false when the stream can no longer
    /// send.
    pub(crate) fn send_headers(
        &mut self,
        stream_id: u32,
        status: u16,
        headers: Vec<HeaderField>,
        end_stream: bool,
    ) -> bool {
        let Some(entry) = self.streams.get(&stream_id) else {
            return false;
        };
        if !entry.state.can_send() {
            return false;
        }
        let mut fields = Vec::with_capacity(headers.len() + 1);
        fields.push(HeaderField::new(&b":status"[..], status.to_string().into_bytes()));
        fields.extend(headers);
        if let Err(err) = self.writer.headers(stream_id, &fields, end_stream) {
            self.failure.get_or_insert(err);
            return false;
        }
        if end_stream {
            self.send_end_stream(stream_id);
        }
        true
    }

    /// Queue response DATA. `done` fires once every byte has been written.
    pub(crate) fn queue_data(
        &mut self,
        stream_id: u32,
        data: Bytes,
        end_stream: bool,
        done: Option<oneshot::Sender<bool>>,
    ) {
        let Some(entry) = self.streams.get_mut(&stream_id) else {
            if let Some(done) = done {
                let _ = done.send(false);
            }
            return;
        };
        entry.outbound.push_back(Outbound {
            data,
            end_stream,
            done,
        });
        self.pump();
    }

    /// Write queued DATA as far as the send windows allow.
    fn pump(&mut self) {
        let max_frame_size = self.writer.max_frame_size();
        let ids: Vec<u32> = self
            .streams
            .iter()
            .filter(|(_, entry)| !entry.outbound.is_empty())
            .map(|(id, _)| *id)
            .collect();

        for id in ids {
            loop {
                let Some(entry) = self.streams.get_mut(&id) else {
                    break;
                };
                let Some(front) = entry.outbound.front_mut() else {
                    break;
                };

                let granted = if front.data.is_empty() {
                    0
                } else {
                    let granted = self
                        .flow
                        .try_reserve(id, front.data.len().min(max_frame_size));
                    if granted == 0 {
                        trace!(stream_id = id, "send window exhausted");
                        break;
                    }
                    granted
                };
                let chunk = front.data.split_to(granted);
                let finished = front.data.is_empty();
                let end_stream = finished && front.end_stream;
                if !chunk.is_empty() || end_stream {
                    if let Err(err) = self.writer.data(id, &chunk, end_stream) {
                        self.failure.get_or_insert(err);
                        return;
                    }
                }
                if !finished {
                    continue;
                }
                if let Some(done) = entry.outbound.pop_front().and_then(|o| o.done) {
                    let _ = done.send(true);
                }
                if end_stream {
                    self.send_end_stream(id);
                    break;
                }
            }
        }
    }

    fn send_end_stream(&mut self, stream_id: u32) {
        let Some(entry) = self.streams.get_mut(&stream_id) else {
            return;
        };
        let Some(next) = entry.state.send_end_stream() else {
            return;
        };
        entry.state = next;
        match next {
            StreamState::Closed => self.close_stream(stream_id, false),
            StreamState::HalfClosedLocal => {
                // The response is complete; the rest of the request body is
                // not needed.
                self.close_stream(stream_id, false);
                if let Err(err) = self.writer.rst_stream(stream_id, ErrorCode::NoError) {
                    self.failure.get_or_insert(err);
                }
            }
            _ => {}
        }
    }
}

struct RequestParts {
    method: String,
    path: String,
    scheme: Option<String>,
    authority: Option<String>,
    headers: Vec<HeaderField>,
}

impl RequestParts {
    fn parse(id: u32, fields: Vec<HeaderField>) -> Result<Self> {
        let malformed = |reason: &str| {
            ConnectionError::stream(id, ErrorCode::ProtocolError, format!("malformed request: {reason}"))
        };

        let mut method = None;
        let mut path = None;
        let mut scheme = None;
        let mut authority = None;
        let mut headers = Vec::with_capacity(fields.len());

        for field in fields {
            let name = field.name.as_ref();
            if name.starts_with(b":") {
                if !headers.is_empty() {
                    return Err(malformed("pseudo-header after regular header"));
                }
                let slot = match name {
                    b":method" => &mut method,
                    b":path" => &mut path,
                    b":scheme" => &mut scheme,
                    b":authority" => &mut authority,
                    _ => return Err(malformed("unknown pseudo-header")),
                };
                if slot.is_some() {
                    return Err(malformed("duplicate pseudo-header"));
                }
                let value = String::from_utf8(field.value.to_vec())
                    .map_err(|_| malformed("pseudo-header is not UTF-8"))?;
                *slot = Some(value);
                continue;
            }

            if name.iter().any(u8::is_ascii_uppercase) {
                return Err(malformed("uppercase header name"));
            }
            if CONNECTION_SPECIFIC_HEADERS.contains(&name) {
                return Err(malformed("connection-specific header"));
            }
            if name == b"te" && field.value.as_ref() != b"trailers" {
                return Err(malformed("te other than trailers"));
            }
            headers.push(field);
        }

        let Some(method) = method else {
            return Err(malformed("missing :method"));
        };
        let path = match path {
            Some(path) if !path.is_empty() => path,
            None if method == "CONNECT" => String::new(),
            _ => return Err(malformed("missing :path")),
        };
        if method != "CONNECT" && scheme.is_none() {
            warn!(stream_id = id, "request without :scheme");
        }
        Ok(Self {
            method,
            path,
            scheme,
            authority,
            headers,
        })
    }
}
