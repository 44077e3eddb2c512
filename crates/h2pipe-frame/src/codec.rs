use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::types::{Flags, FrameType};

/// Frame header: length (3) + type (1) + flags (1) + stream id (4) = 9 bytes.
pub const FRAME_HEADER_SIZE: usize = 9;

/// Initial and minimum SETTINGS_MAX_FRAME_SIZE.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16_384;

/// Largest SETTINGS_MAX_FRAME_SIZE a peer may advertise (2^24 - 1).
pub const MAX_MAX_FRAME_SIZE: usize = 16_777_215;

/// The reserved high bit of the stream id field.
const STREAM_ID_MASK: u32 = 0x7fff_ffff;

/// Octets every client sends before its first frame.
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// The fixed 9-byte frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: usize,
    pub kind: FrameType,
    pub flags: Flags,
    pub stream_id: u32,
}

impl FrameHeader {
    /// Decode a header. The reserved bit of the stream id is ignored.
    pub fn parse(src: &[u8; FRAME_HEADER_SIZE]) -> Self {
        let length = (usize::from(src[0]) << 16) | (usize::from(src[1]) << 8) | usize::from(src[2]);
        let stream_id = u32::from_be_bytes([src[5], src[6], src[7], src[8]]) & STREAM_ID_MASK;
        Self {
            length,
            kind: FrameType::from(src[3]),
            flags: Flags(src[4]),
            stream_id,
        }
    }

    /// Encode this header. The reserved bit is always written as zero.
    pub fn write(&self, dst: &mut BytesMut) {
        dst.reserve(FRAME_HEADER_SIZE);
        // Length is validated against MAX_MAX_FRAME_SIZE by callers.
        dst.put_uint(self.length as u64, 3);
        dst.put_u8(self.kind.into());
        dst.put_u8(self.flags.bits());
        dst.put_u32(self.stream_id & STREAM_ID_MASK);
    }
}

/// A frame whose payload borrows the read buffer it was parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub header: FrameHeader,
    pub payload: &'a [u8],
}

impl<'a> Frame<'a> {
    pub fn kind(&self) -> FrameType {
        self.header.kind
    }

    pub fn flags(&self) -> Flags {
        self.header.flags
    }

    pub fn stream_id(&self) -> u32 {
        self.header.stream_id
    }

    /// Copy the payload out of the read buffer.
    pub fn to_owned_frame(&self) -> OwnedFrame {
        OwnedFrame {
            header: self.header,
            payload: Bytes::copy_from_slice(self.payload),
        }
    }
}

/// A frame that owns its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedFrame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl OwnedFrame {
    pub fn new(kind: FrameType, flags: Flags, stream_id: u32, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        Self {
            header: FrameHeader {
                length: payload.len(),
                kind,
                flags,
                stream_id: stream_id & STREAM_ID_MASK,
            },
            payload,
        }
    }

    pub fn kind(&self) -> FrameType {
        self.header.kind
    }

    pub fn flags(&self) -> Flags {
        self.header.flags
    }

    pub fn stream_id(&self) -> u32 {
        self.header.stream_id
    }

    pub fn as_frame(&self) -> Frame<'_> {
        Frame {
            header: self.header,
            payload: &self.payload,
        }
    }
}

/// Parse one frame from the front of `src`.
///
/// Returns `Ok(None)` when `src` does not yet hold a complete frame, or the
/// frame and the number of bytes it occupies. Never allocates. A declared
/// length above `max_frame_size` is an error as soon as the header is visible;
/// the frame is never truncated.
pub fn try_parse_frame(src: &[u8], max_frame_size: usize) -> Result<Option<(Frame<'_>, usize)>> {
    let Some(header_bytes) = src.first_chunk::<FRAME_HEADER_SIZE>() else {
        return Ok(None); // Need more data
    };
    let header = FrameHeader::parse(header_bytes);

    if header.length > max_frame_size {
        return Err(FrameError::FrameTooLarge {
            size: header.length,
            max: max_frame_size,
        });
    }

    let total = FRAME_HEADER_SIZE + header.length;
    if src.len() < total {
        return Ok(None); // Need more data
    }

    Ok(Some((
        Frame {
            header,
            payload: &src[FRAME_HEADER_SIZE..total],
        },
        total,
    )))
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// +-----------------------------------------------+
/// |                 Length (24)                   |
/// +---------------+---------------+---------------+
/// |   Type (8)    |   Flags (8)   |
/// +-+-------------+---------------+-------------------------------+
/// |R|                 Stream Identifier (31)                      |
/// +=+=============================================================+
/// |                   Frame Payload (0...)                      ...
/// +---------------------------------------------------------------+
/// ```
pub fn write_frame(
    kind: FrameType,
    flags: Flags,
    stream_id: u32,
    payload: &[u8],
    max_frame_size: usize,
    dst: &mut BytesMut,
) -> Result<()> {
    if payload.len() > max_frame_size.min(MAX_MAX_FRAME_SIZE) {
        return Err(FrameError::FrameTooLarge {
            size: payload.len(),
            max: max_frame_size.min(MAX_MAX_FRAME_SIZE),
        });
    }
    dst.reserve(FRAME_HEADER_SIZE + payload.len());
    FrameHeader {
        length: payload.len(),
        kind,
        flags,
        stream_id,
    }
    .write(dst);
    dst.put_slice(payload);
    Ok(())
}
