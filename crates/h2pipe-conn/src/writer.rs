//! Serializes outbound frames into a connection's output pipe.

use bytes::BytesMut;
use h2pipe_frame::payload::{write_goaway, write_ping, write_rst_stream, write_window_update};
use h2pipe_frame::settings::{write_settings, write_settings_ack};
use h2pipe_frame::{
    write_frame, ErrorCode, Flags, FrameType, SettingId, DEFAULT_HEADER_TABLE_SIZE,
    DEFAULT_MAX_FRAME_SIZE,
};
use h2pipe_hpack::{Encoder, HeaderField};
use h2pipe_transport::{FlushResult, PipeWriter};
use tracing::trace;

use crate::error::Result;

/// Frame writer owning the output pipe and the HPACK encoder.
///
/// Frames are appended to the pipe without publishing them; [`flush`] makes
/// them visible to the send loop and applies backpressure.
///
/// [`flush`]: FrameWriter::flush
#[derive(Debug)]
pub struct FrameWriter {
    output: PipeWriter,
    encoder: Encoder,
    scratch: BytesMut,
    block: BytesMut,
    max_frame_size: usize,
}

impl FrameWriter {
    /// The encoder starts at the protocol default table size, which is all
    /// the peer's decoder holds until its SETTINGS say otherwise, and never
    /// grows past `header_table_limit`.
    pub fn new(output: PipeWriter, header_table_limit: usize) -> Self {
        let mut encoder = Encoder::new(DEFAULT_HEADER_TABLE_SIZE as usize);
        if header_table_limit < DEFAULT_HEADER_TABLE_SIZE as usize {
            encoder.set_max_table_size(header_table_limit);
        }
        Self {
            output,
            encoder,
            scratch: BytesMut::with_capacity(DEFAULT_MAX_FRAME_SIZE + 9),
            block: BytesMut::new(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Apply the peer's SETTINGS_MAX_FRAME_SIZE.
    pub fn set_max_frame_size(&mut self, size: usize) {
        self.max_frame_size = size;
    }

    /// Apply the peer's SETTINGS_HEADER_TABLE_SIZE, capped at `limit`.
    pub fn set_header_table_size(&mut self, size: usize, limit: usize) {
        self.encoder.set_max_table_size(size.min(limit));
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    pub fn settings(&mut self, params: &[(SettingId, u32)]) -> Result<()> {
        write_settings(params, &mut self.scratch)?;
        self.commit()
    }

    pub fn settings_ack(&mut self) -> Result<()> {
        write_settings_ack(&mut self.scratch)?;
        self.commit()
    }

    pub fn ping_ack(&mut self, data: [u8; 8]) -> Result<()> {
        write_ping(true, data, &mut self.scratch)?;
        self.commit()
    }

    pub fn goaway(&mut self, last_stream_id: u32, code: ErrorCode, debug: &[u8]) -> Result<()> {
        write_goaway(last_stream_id, code, debug, &mut self.scratch)?;
        self.commit()
    }

    pub fn rst_stream(&mut self, stream_id: u32, code: ErrorCode) -> Result<()> {
        write_rst_stream(stream_id, code, &mut self.scratch)?;
        self.commit()
    }

    pub fn window_update(&mut self, stream_id: u32, increment: u32) -> Result<()> {
        write_window_update(stream_id, increment, &mut self.scratch)?;
        self.commit()
    }

    /// Encode a header list and write it as HEADERS followed by as many
    /// CONTINUATION frames as the peer's frame size requires.
    pub fn headers(
        &mut self,
        stream_id: u32,
        fields: &[HeaderField],
        end_stream: bool,
    ) -> Result<()> {
        self.block.clear();
        self.encoder.encode(fields, &mut self.block);
        let block = self.block.split().freeze();

        let mut chunks = block.chunks(self.max_frame_size).peekable();
        let mut kind = FrameType::Headers;
        let mut flags = if end_stream {
            Flags::END_STREAM
        } else {
            Flags::empty()
        };
        loop {
            let chunk = chunks.next().unwrap_or_default();
            let last = chunks.peek().is_none();
            if last {
                flags.insert(Flags::END_HEADERS);
            }
            write_frame(
                kind,
                flags,
                stream_id,
                chunk,
                self.max_frame_size,
                &mut self.scratch,
            )?;
            if last {
                break;
            }
            kind = FrameType::Continuation;
            flags = Flags::empty();
        }
        trace!(stream_id, block_len = block.len(), "headers written");
        self.commit()
    }

    /// Write one DATA frame. `data` must fit the peer's frame size.
    pub fn data(&mut self, stream_id: u32, data: &[u8], end_stream: bool) -> Result<()> {
        let flags = if end_stream {
            Flags::END_STREAM
        } else {
            Flags::empty()
        };
        write_frame(
            FrameType::Data,
            flags,
            stream_id,
            data,
            self.max_frame_size,
            &mut self.scratch,
        )?;
        self.commit()
    }

    /// Publish everything written so far. Suspends under backpressure.
    pub async fn flush(&self) -> Result<FlushResult> {
        Ok(self.output.flush().await?)
    }

    /// Bytes written or flushed but not yet taken by the send loop.
    pub fn unconsumed(&self) -> usize {
        self.output.unconsumed()
    }

    /// Signal end of output. The send loop finishes writing and closes.
    pub fn complete(&self) {
        self.output.complete(None);
    }

    fn commit(&mut self) -> Result<()> {
        let frame = self.scratch.split();
        self.output.write(&frame)?;
        Ok(())
    }
}
