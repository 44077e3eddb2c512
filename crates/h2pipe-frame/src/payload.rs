//! Typed views over frame payloads and writers for the control frames.

use bytes::{BufMut, BytesMut};

use crate::codec::{write_frame, DEFAULT_MAX_FRAME_SIZE};
use crate::error::{FrameError, Result};
use crate::types::{ErrorCode, Flags, FrameType};

/// Stream dependency carried by PRIORITY frames and prioritized HEADERS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrioritySpec {
    pub dependency: u32,
    pub exclusive: bool,
    /// Wire value; the effective weight is `weight + 1`.
    pub weight: u8,
}

impl PrioritySpec {
    fn parse(src: &[u8; 5]) -> Self {
        let raw = u32::from_be_bytes([src[0], src[1], src[2], src[3]]);
        Self {
            dependency: raw & 0x7fff_ffff,
            exclusive: raw & 0x8000_0000 != 0,
            weight: src[4],
        }
    }
}

/// Header block fragment of a HEADERS frame, with padding and priority removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadersPayload<'a> {
    pub priority: Option<PrioritySpec>,
    pub fragment: &'a [u8],
}

/// GOAWAY contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GoAway<'a> {
    pub last_stream_id: u32,
    pub error_code: ErrorCode,
    pub debug_data: &'a [u8],
}

fn invalid_length(frame_type: FrameType, length: usize, reason: &'static str) -> FrameError {
    FrameError::InvalidLength {
        frame_type,
        length,
        reason,
    }
}

/// Remove padding from a DATA or HEADERS payload when `PADDED` is set.
pub fn strip_padding(frame_type: FrameType, flags: Flags, payload: &[u8]) -> Result<&[u8]> {
    if !flags.contains(Flags::PADDED) {
        return Ok(payload);
    }
    let Some((&pad_len, rest)) = payload.split_first() else {
        return Err(invalid_length(frame_type, 0, "padded frame without pad length"));
    };
    let pad_len = usize::from(pad_len);
    if pad_len >= payload.len() {
        return Err(FrameError::Protocol("padding exceeds payload"));
    }
    Ok(&rest[..rest.len() - pad_len])
}

/// Parse a HEADERS payload.
pub fn parse_headers(flags: Flags, payload: &[u8]) -> Result<HeadersPayload<'_>> {
    let unpadded = strip_padding(FrameType::Headers, flags, payload)?;
    if !flags.contains(Flags::PRIORITY) {
        return Ok(HeadersPayload {
            priority: None,
            fragment: unpadded,
        });
    }
    let Some((spec, fragment)) = unpadded.split_first_chunk::<5>() else {
        return Err(invalid_length(
            FrameType::Headers,
            payload.len(),
            "priority block truncated",
        ));
    };
    Ok(HeadersPayload {
        priority: Some(PrioritySpec::parse(spec)),
        fragment,
    })
}

/// Parse a PRIORITY payload (exactly 5 bytes).
pub fn parse_priority(payload: &[u8]) -> Result<PrioritySpec> {
    let spec: &[u8; 5] = payload
        .try_into()
        .map_err(|_| invalid_length(FrameType::Priority, payload.len(), "must be 5 bytes"))?;
    Ok(PrioritySpec::parse(spec))
}

/// Parse an RST_STREAM payload (exactly 4 bytes).
pub fn parse_rst_stream(payload: &[u8]) -> Result<ErrorCode> {
    let code: [u8; 4] = payload
        .try_into()
        .map_err(|_| invalid_length(FrameType::RstStream, payload.len(), "must be 4 bytes"))?;
    Ok(ErrorCode::from(u32::from_be_bytes(code)))
}

/// Parse a PING payload (exactly 8 bytes of opaque data).
pub fn parse_ping(payload: &[u8]) -> Result<[u8; 8]> {
    payload
        .try_into()
        .map_err(|_| invalid_length(FrameType::Ping, payload.len(), "must be 8 bytes"))
}

/// Parse a GOAWAY payload (at least 8 bytes).
pub fn parse_goaway(payload: &[u8]) -> Result<GoAway<'_>> {
    let Some((fixed, debug_data)) = payload.split_first_chunk::<8>() else {
        return Err(invalid_length(
            FrameType::GoAway,
            payload.len(),
            "must be at least 8 bytes",
        ));
    };
    Ok(GoAway {
        last_stream_id: u32::from_be_bytes([fixed[0], fixed[1], fixed[2], fixed[3]]) & 0x7fff_ffff,
        error_code: ErrorCode::from(u32::from_be_bytes([fixed[4], fixed[5], fixed[6], fixed[7]])),
        debug_data,
    })
}

/// Parse a WINDOW_UPDATE payload (exactly 4 bytes) into its 31-bit increment.
///
/// A zero increment is returned as is; the receiver decides which error it is.
pub fn parse_window_update(payload: &[u8]) -> Result<u32> {
    let raw: [u8; 4] = payload
        .try_into()
        .map_err(|_| invalid_length(FrameType::WindowUpdate, payload.len(), "must be 4 bytes"))?;
    Ok(u32::from_be_bytes(raw) & 0x7fff_ffff)
}

pub fn write_ping(ack: bool, data: [u8; 8], dst: &mut BytesMut) -> Result<()> {
    let flags = if ack { Flags::ACK } else { Flags::empty() };
    write_frame(FrameType::Ping, flags, 0, &data, DEFAULT_MAX_FRAME_SIZE, dst)
}

pub fn write_goaway(
    last_stream_id: u32,
    error_code: ErrorCode,
    debug_data: &[u8],
    dst: &mut BytesMut,
) -> Result<()> {
    let mut payload = BytesMut::with_capacity(8 + debug_data.len());
    payload.put_u32(last_stream_id & 0x7fff_ffff);
    payload.put_u32(error_code.into());
    payload.put_slice(debug_data);
    write_frame(
        FrameType::GoAway,
        Flags::empty(),
        0,
        &payload,
        DEFAULT_MAX_FRAME_SIZE,
        dst,
    )
}

pub fn write_rst_stream(stream_id: u32, error_code: ErrorCode, dst: &mut BytesMut) -> Result<()> {
    write_frame(
        FrameType::RstStream,
        Flags::empty(),
        stream_id,
        &u32::from(error_code).to_be_bytes(),
        DEFAULT_MAX_FRAME_SIZE,
        dst,
    )
}

pub fn write_window_update(stream_id: u32, increment: u32, dst: &mut BytesMut) -> Result<()> {
    write_frame(
        FrameType::WindowUpdate,
        Flags::empty(),
        stream_id,
        &(increment & 0x7fff_ffff).to_be_bytes(),
        DEFAULT_MAX_FRAME_SIZE,
        dst,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::try_parse_frame;

    #[test]
    fn padding_is_removed() {
        let payload = [3, b'h', b'i', 0, 0, 0];
        let data = strip_padding(FrameType::Data, Flags::PADDED, &payload).unwrap();
        assert_eq!(data, b"hi");

        let unpadded = strip_padding(FrameType::Data, Flags::empty(), &payload).unwrap();
        assert_eq!(unpadded.len(), payload.len());
    }

    #[test]
    fn padding_longer_than_payload_is_protocol_error() {
        let payload = [5, b'x', 0];
        let err = strip_padding(FrameType::Data, Flags::PADDED, &payload).unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::ProtocolError);

        let err = strip_padding(FrameType::Data, Flags::PADDED, &[]).unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::FrameSizeError);
    }

    #[test]
    fn headers_priority_block_is_skipped() {
        let payload = [
            1, // pad length
            0x80, 0, 0, 3,  // exclusive, depends on 3
            15, // weight
            0x82, 0x84, // fragment
            0,    // padding
        ];
        let headers = parse_headers(Flags::PADDED | Flags::PRIORITY, &payload).unwrap();
        assert_eq!(headers.fragment, &[0x82, 0x84]);
        assert_eq!(
            headers.priority,
            Some(PrioritySpec {
                dependency: 3,
                exclusive: true,
                weight: 15
            })
        );
    }

    #[test]
    fn fixed_length_payloads_are_checked() {
        assert_eq!(
            parse_priority(&[0, 0, 0]).unwrap_err().error_code(),
            ErrorCode::FrameSizeError
        );
        assert_eq!(
            parse_rst_stream(&[0, 0, 0, 8]).unwrap(),
            ErrorCode::Cancel
        );
        assert!(parse_rst_stream(&[0, 0, 8]).is_err());
        assert!(parse_ping(&[0; 7]).is_err());
        assert!(parse_window_update(&[0; 5]).is_err());
        assert!(parse_goaway(&[0; 7]).is_err());
    }

    #[test]
    fn window_update_masks_reserved_bit() {
        assert_eq!(parse_window_update(&[0x80, 0, 0x10, 0]).unwrap(), 4096);
        assert_eq!(parse_window_update(&[0, 0, 0, 0]).unwrap(), 0);
    }

    #[test]
    fn goaway_write_and_parse() {
        let mut buf = BytesMut::new();
        write_goaway(7, ErrorCode::EnhanceYourCalm, b"slow down", &mut buf).unwrap();

        let (frame, _) = try_parse_frame(&buf, 16_384).unwrap().unwrap();
        assert_eq!(frame.kind(), FrameType::GoAway);
        assert_eq!(frame.stream_id(), 0);
        let goaway = parse_goaway(frame.payload).unwrap();
        assert_eq!(goaway.last_stream_id, 7);
        assert_eq!(goaway.error_code, ErrorCode::EnhanceYourCalm);
        assert_eq!(goaway.debug_data, b"slow down");
    }

    #[test]
    fn ping_ack_echoes_data() {
        let mut buf = BytesMut::new();
        write_ping(true, *b"12345678", &mut buf).unwrap();
        let (frame, _) = try_parse_frame(&buf, 16_384).unwrap().unwrap();
        assert!(frame.flags().contains(Flags::ACK));
        assert_eq!(&parse_ping(frame.payload).unwrap(), b"12345678");
    }

    #[test]
    fn rst_stream_and_window_update_frames() {
        let mut buf = BytesMut::new();
        write_rst_stream(5, ErrorCode::RefusedStream, &mut buf).unwrap();
        write_window_update(0, 1 << 16, &mut buf).unwrap();

        let (rst, used) = try_parse_frame(&buf, 16_384).unwrap().unwrap();
        assert_eq!(rst.stream_id(), 5);
        assert_eq!(parse_rst_stream(rst.payload).unwrap(), ErrorCode::RefusedStream);

        let (update, _) = try_parse_frame(&buf[used..], 16_384).unwrap().unwrap();
        assert_eq!(parse_window_update(update.payload).unwrap(), 1 << 16);
    }
}
