use crate::types::{ErrorCode, FrameType};

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The declared payload length exceeds the negotiated maximum frame size.
    #[error("frame too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// The payload length is wrong for the frame type.
    #[error("invalid {frame_type} payload length {length}: {reason}")]
    InvalidLength {
        frame_type: FrameType,
        length: usize,
        reason: &'static str,
    },

    /// The payload is well-sized but violates the protocol.
    #[error("protocol violation: {0}")]
    Protocol(&'static str),

    /// A SETTINGS parameter is outside its permitted range.
    #[error("invalid value {value} for setting 0x{id:x}")]
    InvalidSetting { id: u16, value: u32 },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// The error code a connection reports to its peer for this error.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            FrameError::FrameTooLarge { .. } | FrameError::InvalidLength { .. } => {
                ErrorCode::FrameSizeError
            }
            FrameError::Protocol(_) => ErrorCode::ProtocolError,
            // Only INITIAL_WINDOW_SIZE overflow maps to a flow-control error.
            FrameError::InvalidSetting { id: 0x4, .. } => ErrorCode::FlowControlError,
            FrameError::InvalidSetting { .. } => ErrorCode::ProtocolError,
            FrameError::Io(_) => ErrorCode::InternalError,
        }
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
