use std::time::Duration;

use h2pipe_frame::ErrorCode;

/// Flow-control violations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowControlError {
    /// A WINDOW_UPDATE pushed a stream's send window past 2^31 - 1.
    #[error("send window overflow on stream {stream_id}")]
    StreamOverflow { stream_id: u32 },

    /// A WINDOW_UPDATE or SETTINGS change pushed a send window past 2^31 - 1.
    #[error("connection send window overflow")]
    ConnectionOverflow,

    /// The peer sent more DATA on a stream than its receive window allowed.
    #[error("peer exceeded the receive window of stream {stream_id}")]
    StreamReceiveExceeded { stream_id: u32 },

    /// The peer sent more DATA than the connection receive window allowed.
    #[error("peer exceeded the connection receive window")]
    ConnectionReceiveExceeded,
}

/// Errors that end a stream or a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// A connection-fatal protocol violation. Reported with GOAWAY.
    #[error("connection error {code}: {reason}")]
    Protocol { code: ErrorCode, reason: String },

    /// A violation confined to one stream. Reported with RST_STREAM.
    #[error("stream {id} error {code}: {reason}")]
    Stream {
        id: u32,
        code: ErrorCode,
        reason: String,
    },

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] h2pipe_transport::TransportError),

    /// The connection's byte pipe failed or was closed underneath it.
    #[error("pipe error: {0}")]
    Pipe(#[from] h2pipe_transport::PipeError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] h2pipe_frame::FrameError),

    /// Header compression error.
    #[error("header compression error: {0}")]
    Hpack(#[from] h2pipe_hpack::HpackError),

    /// The connection was aborted locally.
    #[error("connection aborted")]
    Aborted,

    /// An operation or drain period ran out of time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl ConnectionError {
    pub fn protocol(code: ErrorCode, reason: impl Into<String>) -> Self {
        ConnectionError::Protocol {
            code,
            reason: reason.into(),
        }
    }

    pub fn stream(id: u32, code: ErrorCode, reason: impl Into<String>) -> Self {
        ConnectionError::Stream {
            id,
            code,
            reason: reason.into(),
        }
    }

    /// The code written to GOAWAY or RST_STREAM for this error.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            ConnectionError::Protocol { code, .. } | ConnectionError::Stream { code, .. } => *code,
            ConnectionError::Frame(err) => err.error_code(),
            ConnectionError::Hpack(_) => ErrorCode::CompressionError,
            ConnectionError::Timeout(_) => ErrorCode::NoError,
            ConnectionError::Transport(_) | ConnectionError::Pipe(_) | ConnectionError::Aborted => {
                ErrorCode::InternalError
            }
        }
    }

    /// Whether only one stream is affected.
    pub fn is_stream_error(&self) -> bool {
        matches!(self, ConnectionError::Stream { .. })
    }
}

impl From<FlowControlError> for ConnectionError {
    fn from(err: FlowControlError) -> Self {
        match err {
            FlowControlError::StreamOverflow { stream_id }
            | FlowControlError::StreamReceiveExceeded { stream_id } => {
                ConnectionError::stream(stream_id, ErrorCode::FlowControlError, err.to_string())
            }
            FlowControlError::ConnectionOverflow | FlowControlError::ConnectionReceiveExceeded => {
                ConnectionError::protocol(ErrorCode::FlowControlError, err.to_string())
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ConnectionError>;
