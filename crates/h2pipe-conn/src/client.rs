//! Minimal HTTP/2 client: one request at a time over any byte stream.
//!
//! Used by the `probe` command and by tests that need to speak to a server
//! from the outside.

use std::io;

use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use h2pipe_frame::payload::{
    parse_goaway, parse_headers, parse_ping, parse_rst_stream, parse_window_update, strip_padding,
};
use h2pipe_frame::settings::{parse_settings, write_settings};
use h2pipe_frame::{
    ErrorCode, Flags, FrameCodec, FrameConfig, FrameError, FrameType, OwnedFrame, Settings,
    CONNECTION_PREFACE, DEFAULT_INITIAL_WINDOW_SIZE,
};
use h2pipe_hpack::{Decoder, Encoder, HeaderField};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::Framed;
use tracing::{debug, trace};

use crate::error::{ConnectionError, Result};

/// A request to send with [`ClientSession::request`].
#[derive(Debug, Clone)]
pub struct ClientRequest {
    pub method: String,
    pub path: String,
    pub authority: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl ClientRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            authority: None,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new("GET", path)
    }

    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = Some(authority.into());
        self
    }

    /// Add a header. Names are lowercased.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .push((name.as_ref().to_ascii_lowercase(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    fn header_fields(&self) -> Vec<HeaderField> {
        let mut fields = vec![
            HeaderField::new(Bytes::from_static(b":method"), self.method.clone()),
            HeaderField::new(Bytes::from_static(b":scheme"), Bytes::from_static(b"http")),
            HeaderField::new(Bytes::from_static(b":path"), self.path.clone()),
        ];
        if let Some(authority) = &self.authority {
            fields.push(HeaderField::new(
                Bytes::from_static(b":authority"),
                authority.clone(),
            ));
        }
        fields.extend(
            self.headers
                .iter()
                .map(|(name, value)| HeaderField::new(name.clone(), value.clone())),
        );
        fields
    }
}

/// A complete response, with trailers appended to `headers`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientResponse {
    pub status: u16,
    pub headers: Vec<HeaderField>,
    pub body: Bytes,
}

impl ClientResponse {
    /// First value of a header, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|field| field.name.as_ref() == name.as_bytes())
            .and_then(|field| std::str::from_utf8(&field.value).ok())
    }
}

/// Client side of one HTTP/2 connection.
pub struct ClientSession<S> {
    framed: Framed<S, FrameCodec>,
    encoder: Encoder,
    decoder: Decoder,
    peer_settings: Settings,
    next_stream_id: u32,
    connection_window: i64,
    stream_window: i64,
    block: BytesMut,
}

impl<S> ClientSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Send the preface and settings, then wait for the server's SETTINGS.
    pub async fn connect(mut stream: S) -> Result<Self> {
        let mut preface = BytesMut::from(CONNECTION_PREFACE);
        write_settings(&[], &mut preface)?;
        stream.write_all(&preface).await.map_err(FrameError::from)?;
        stream.flush().await.map_err(FrameError::from)?;

        let mut session = Self {
            framed: Framed::new(stream, FrameCodec::with_config(FrameConfig::default())),
            encoder: Encoder::new(Settings::default().header_table_size as usize),
            decoder: Decoder::new(Settings::default().header_table_size as usize),
            peer_settings: Settings::default(),
            next_stream_id: 1,
            connection_window: i64::from(DEFAULT_INITIAL_WINDOW_SIZE),
            stream_window: i64::from(DEFAULT_INITIAL_WINDOW_SIZE),
            block: BytesMut::new(),
        };

        let first = session.next_frame().await?;
        if first.kind() != FrameType::Settings || first.flags().contains(Flags::ACK) {
            return Err(ConnectionError::protocol(
                ErrorCode::ProtocolError,
                format!("expected SETTINGS from server, got {}", first.kind()),
            ));
        }
        session.on_settings(&first).await?;
        debug!(settings = ?session.peer_settings, "client connected");
        Ok(session)
    }

    /// The server's settings as last received.
    pub fn peer_settings(&self) -> &Settings {
        &self.peer_settings
    }

    /// Response header decoder; its dynamic table mirrors the server encoder's.
    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    /// Send one request and read its complete response.
    pub async fn request(&mut self, request: ClientRequest) -> Result<ClientResponse> {
        let stream_id = self.next_stream_id;
        self.next_stream_id += 2;
        let end_stream = request.body.is_empty();
        self.send_headers(stream_id, &request.header_fields(), end_stream)
            .await?;
        let mut send_window = self.stream_window;
        if !end_stream {
            self.send_body(stream_id, request.body, &mut send_window)
                .await?;
        }
        self.read_response(stream_id).await
    }

    /// Send GOAWAY and close the write side.
    pub async fn close(mut self) -> Result<()> {
        let last = self.next_stream_id.saturating_sub(2);
        let mut payload = BytesMut::with_capacity(8);
        payload.extend_from_slice(&last.to_be_bytes());
        payload.extend_from_slice(&u32::from(ErrorCode::NoError).to_be_bytes());
        self.framed
            .send(OwnedFrame::new(FrameType::GoAway, Flags::empty(), 0, payload))
            .await?;
        self.framed
            .get_mut()
            .shutdown()
            .await
            .map_err(FrameError::from)?;
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<OwnedFrame> {
        match self.framed.next().await {
            Some(frame) => {
                let frame = frame?;
                trace!(frame_type = %frame.kind(), stream_id = frame.stream_id(), "client received");
                Ok(frame)
            }
            None => Err(FrameError::from(io::Error::from(io::ErrorKind::UnexpectedEof)).into()),
        }
    }

    async fn send_headers(
        &mut self,
        stream_id: u32,
        fields: &[HeaderField],
        end_stream: bool,
    ) -> Result<()> {
        self.block.clear();
        self.encoder.encode(fields, &mut self.block);
        let block = self.block.split().freeze();
        let max = self.peer_settings.max_frame_size as usize;

        let mut offset = 0;
        let mut kind = FrameType::Headers;
        loop {
            let end = (offset + max).min(block.len());
            let mut flags = Flags::empty();
            if kind == FrameType::Headers && end_stream {
                flags.insert(Flags::END_STREAM);
            }
            if end == block.len() {
                flags.insert(Flags::END_HEADERS);
            }
            self.framed
                .feed(OwnedFrame::new(kind, flags, stream_id, block.slice(offset..end)))
                .await?;
            offset = end;
            if offset == block.len() {
                break;
            }
            kind = FrameType::Continuation;
        }
        self.framed.flush().await?;
        Ok(())
    }

    async fn send_body(&mut self, stream_id: u32, mut body: Bytes, window: &mut i64) -> Result<()> {
        while !body.is_empty() {
            let allowed = self
                .connection_window
                .min(*window)
                .min(i64::from(self.peer_settings.max_frame_size))
                .max(0) as usize;
            if allowed == 0 {
                // Blocked on flow control until the server opens a window.
                let frame = self.next_frame().await?;
                if frame.kind() == FrameType::WindowUpdate {
                    let increment = i64::from(parse_window_update(&frame.payload)?);
                    match frame.stream_id() {
                        0 => self.connection_window += increment,
                        id if id == stream_id => *window += increment,
                        _ => {}
                    }
                } else if frame.kind() == FrameType::RstStream && frame.stream_id() == stream_id {
                    let code = parse_rst_stream(&frame.payload)?;
                    return Err(ConnectionError::stream(
                        stream_id,
                        code,
                        "stream reset by server",
                    ));
                } else {
                    self.on_control(stream_id, &frame).await?;
                }
                continue;
            }

            let chunk = body.split_to(allowed.min(body.len()));
            let flags = if body.is_empty() {
                Flags::END_STREAM
            } else {
                Flags::empty()
            };
            self.connection_window -= chunk.len() as i64;
            *window -= chunk.len() as i64;
            self.framed
                .send(OwnedFrame::new(FrameType::Data, flags, stream_id, chunk))
                .await?;
        }
        Ok(())
    }

    async fn read_response(&mut self, stream_id: u32) -> Result<ClientResponse> {
        let mut status = None;
        let mut headers = Vec::new();
        let mut body = BytesMut::new();

        loop {
            let frame = self.next_frame().await?;
            let for_stream = frame.stream_id() == stream_id;
            match frame.kind() {
                FrameType::Headers if for_stream => {
                    let end_stream = frame.flags().contains(Flags::END_STREAM);
                    let fields = self.read_header_block(&frame).await?;
                    for field in fields {
                        if field.name.as_ref() == b":status" {
                            if status.is_none() {
                                status = std::str::from_utf8(&field.value)
                                    .ok()
                                    .and_then(|value| value.parse::<u16>().ok());
                            }
                        } else {
                            headers.push(field);
                        }
                    }
                    if end_stream {
                        break;
                    }
                }
                FrameType::Data if for_stream => {
                    let data = strip_padding(FrameType::Data, frame.flags(), &frame.payload)?;
                    body.extend_from_slice(data);
                    self.return_credit(stream_id, frame.payload.len()).await?;
                    if frame.flags().contains(Flags::END_STREAM) {
                        break;
                    }
                }
                FrameType::RstStream if for_stream => {
                    let code = parse_rst_stream(&frame.payload)?;
                    return Err(ConnectionError::stream(
                        stream_id,
                        code,
                        "stream reset by server",
                    ));
                }
                _ => self.on_control(stream_id, &frame).await?,
            }
        }

        let status = status.ok_or_else(|| {
            ConnectionError::stream(stream_id, ErrorCode::ProtocolError, "response without :status")
        })?;
        Ok(ClientResponse {
            status,
            headers,
            body: body.freeze(),
        })
    }

    /// Collect a HEADERS frame and its CONTINUATIONs, then decode the block.
    async fn read_header_block(&mut self, first: &OwnedFrame) -> Result<Vec<HeaderField>> {
        let headers = parse_headers(first.flags(), &first.payload)?;
        let mut block = BytesMut::from(headers.fragment);
        let mut done = first.flags().contains(Flags::END_HEADERS);
        while !done {
            let next = self.next_frame().await?;
            if next.kind() != FrameType::Continuation || next.stream_id() != first.stream_id() {
                return Err(ConnectionError::protocol(
                    ErrorCode::ProtocolError,
                    format!("expected CONTINUATION, got {}", next.kind()),
                ));
            }
            block.extend_from_slice(&next.payload);
            done = next.flags().contains(Flags::END_HEADERS);
        }
        Ok(self.decoder.decode(&block.freeze())?)
    }

    async fn return_credit(&mut self, stream_id: u32, len: usize) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        let increment = Bytes::copy_from_slice(&(len as u32).to_be_bytes());
        for id in [0, stream_id] {
            self.framed
                .feed(OwnedFrame::new(
                    FrameType::WindowUpdate,
                    Flags::empty(),
                    id,
                    increment.clone(),
                ))
                .await?;
        }
        self.framed.flush().await?;
        Ok(())
    }

    /// Connection-level frames and frames for other streams.
    async fn on_control(&mut self, stream_id: u32, frame: &OwnedFrame) -> Result<()> {
        match frame.kind() {
            FrameType::Settings if !frame.flags().contains(Flags::ACK) => {
                self.on_settings(frame).await
            }
            FrameType::Ping if !frame.flags().contains(Flags::ACK) => {
                let data = parse_ping(&frame.payload)?;
                self.framed
                    .send(OwnedFrame::new(FrameType::Ping, Flags::ACK, 0, data.to_vec()))
                    .await?;
                Ok(())
            }
            FrameType::WindowUpdate if frame.stream_id() == 0 => {
                self.connection_window += i64::from(parse_window_update(&frame.payload)?);
                Ok(())
            }
            FrameType::GoAway => {
                let goaway = parse_goaway(&frame.payload)?;
                if goaway.error_code != ErrorCode::NoError || goaway.last_stream_id < stream_id {
                    return Err(ConnectionError::protocol(
                        goaway.error_code,
                        format!(
                            "server sent GOAWAY: {}",
                            String::from_utf8_lossy(goaway.debug_data)
                        ),
                    ));
                }
                debug!(last_stream_id = goaway.last_stream_id, "server is draining");
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn on_settings(&mut self, frame: &OwnedFrame) -> Result<()> {
        let previous_window = self.peer_settings.initial_window_size;
        for (id, value) in parse_settings(&frame.payload)? {
            self.peer_settings.apply(id, value)?;
        }
        self.stream_window += i64::from(self.peer_settings.initial_window_size)
            - i64::from(previous_window);
        self.encoder
            .set_max_table_size(self.peer_settings.header_table_size as usize);
        self.framed
            .codec_mut()
            .set_max_send_frame_size(self.peer_settings.max_frame_size as usize);
        self.framed
            .send(OwnedFrame::new(FrameType::Settings, Flags::ACK, 0, Bytes::new()))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_fields_start_with_pseudo_headers() {
        let request = ClientRequest::get("/status")
            .with_authority("localhost")
            .with_header("X-Trace", "abc");
        let fields = request.header_fields();
        let names: Vec<&[u8]> = fields.iter().map(|field| field.name.as_ref()).collect();
        assert_eq!(
            names,
            vec![
                &b":method"[..],
                b":scheme",
                b":path",
                b":authority",
                b"x-trace"
            ]
        );
    }

    #[test]
    fn response_header_lookup() {
        let response = ClientResponse {
            status: 200,
            headers: vec![HeaderField::new(
                Bytes::from_static(b"content-type"),
                Bytes::from_static(b"text/plain"),
            )],
            body: Bytes::new(),
        };
        assert_eq!(response.header("content-type"), Some("text/plain"));
        assert_eq!(response.header("server"), None);
    }
}
