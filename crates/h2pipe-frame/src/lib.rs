//! HTTP/2 framing.
//!
//! Every frame starts with a 9-byte header:
//! - a 24-bit big-endian payload length
//! - an 8-bit frame type and an 8-bit flags field
//! - a reserved bit and a 31-bit stream identifier
//!
//! [`try_parse_frame`] reads frames straight out of a receive buffer without
//! copying; [`FrameCodec`] adapts the same format to `tokio_util::codec`.

pub mod codec;
pub mod error;
pub mod framed;
pub mod payload;
pub mod settings;
pub mod types;

pub use codec::{
    try_parse_frame, write_frame, Frame, FrameHeader, OwnedFrame, CONNECTION_PREFACE,
    DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_SIZE, MAX_MAX_FRAME_SIZE,
};
pub use error::{FrameError, Result};
pub use framed::{FrameCodec, FrameConfig};
pub use payload::{GoAway, HeadersPayload, PrioritySpec};
pub use settings::{
    Settings, SettingId, DEFAULT_HEADER_TABLE_SIZE, DEFAULT_INITIAL_WINDOW_SIZE, MAX_WINDOW_SIZE,
};
pub use types::{ErrorCode, Flags, FrameType};
