use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::codec::{
    write_frame, FrameHeader, OwnedFrame, DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_SIZE,
};
use crate::error::{FrameError, Result};

/// Configuration for the frame codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameConfig {
    /// Largest frame accepted from the peer. Default: 16 KiB.
    pub max_recv_frame_size: usize,
    /// Largest frame written to the peer. Default: 16 KiB.
    pub max_send_frame_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_recv_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_send_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// `tokio_util` codec adapter producing [`OwnedFrame`]s.
///
/// Payloads are split off the read buffer without copying.
#[derive(Debug, Clone, Default)]
pub struct FrameCodec {
    config: FrameConfig,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: FrameConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    /// Update the send limit after the peer's SETTINGS_MAX_FRAME_SIZE.
    pub fn set_max_send_frame_size(&mut self, size: usize) {
        self.config.max_send_frame_size = size;
    }
}

impl Decoder for FrameCodec {
    type Item = OwnedFrame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<OwnedFrame>> {
        let Some(header_bytes) = src.first_chunk::<FRAME_HEADER_SIZE>() else {
            return Ok(None);
        };
        let header = FrameHeader::parse(header_bytes);
        if header.length > self.config.max_recv_frame_size {
            return Err(FrameError::FrameTooLarge {
                size: header.length,
                max: self.config.max_recv_frame_size,
            });
        }

        let total = FRAME_HEADER_SIZE + header.length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(FRAME_HEADER_SIZE);
        let payload = src.split_to(header.length).freeze();
        trace!(frame_type = %header.kind, stream_id = header.stream_id, length = header.length, "decoded frame");
        Ok(Some(OwnedFrame { header, payload }))
    }
}

impl Encoder<OwnedFrame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: OwnedFrame, dst: &mut BytesMut) -> Result<()> {
        write_frame(
            frame.header.kind,
            frame.header.flags,
            frame.header.stream_id,
            &frame.payload,
            self.config.max_send_frame_size,
            dst,
        )
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;
    use crate::types::{Flags, FrameType};

    #[tokio::test]
    async fn frames_cross_a_stream() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = FramedWrite::new(client, FrameCodec::new());
        let mut reader = FramedRead::new(server, FrameCodec::new());

        writer
            .send(OwnedFrame::new(FrameType::Data, Flags::END_STREAM, 1, &b"abc"[..]))
            .await
            .unwrap();
        writer
            .send(OwnedFrame::new(FrameType::Ping, Flags::empty(), 0, vec![0u8; 8]))
            .await
            .unwrap();

        let data = reader.next().await.unwrap().unwrap();
        assert_eq!(data.kind(), FrameType::Data);
        assert_eq!(data.payload.as_ref(), b"abc");
        let ping = reader.next().await.unwrap().unwrap();
        assert_eq!(ping.kind(), FrameType::Ping);
        assert_eq!(ping.payload.len(), 8);
    }

    #[test]
    fn decoder_rejects_oversized_frames() {
        let mut codec = FrameCodec::with_config(FrameConfig {
            max_recv_frame_size: 16,
            ..FrameConfig::default()
        });
        let mut src = BytesMut::from(&[0, 0, 17, 0, 0, 0, 0, 0, 1][..]);
        assert!(matches!(
            codec.decode(&mut src),
            Err(FrameError::FrameTooLarge { size: 17, max: 16 })
        ));
    }

    #[test]
    fn decoder_waits_for_full_payload() {
        let mut codec = FrameCodec::new();
        let mut src = BytesMut::from(&[0, 0, 4, 0, 0, 0, 0, 0, 1, b'a'][..]);
        assert!(codec.decode(&mut src).unwrap().is_none());
        src.extend_from_slice(b"bcd");
        let frame = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(frame.payload.as_ref(), b"abcd");
        assert!(src.is_empty());
    }

    #[test]
    fn encoder_respects_send_limit() {
        let mut codec = FrameCodec::new();
        codec.set_max_send_frame_size(4);
        let mut dst = BytesMut::new();
        let frame = OwnedFrame::new(FrameType::Data, Flags::empty(), 1, &b"too long"[..]);
        assert!(codec.encode(frame, &mut dst).is_err());
    }
}
