use std::path::PathBuf;
use std::sync::Arc;

/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind to the specified endpoint.
    #[error("failed to bind to {endpoint}: {source}")]
    Bind {
        endpoint: String,
        source: std::io::Error,
    },

    /// Failed to connect to the specified endpoint.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// The endpoint descriptor could not be parsed.
    #[error("invalid endpoint '{input}': {reason}")]
    InvalidEndpoint { input: String, reason: &'static str },

    /// The endpoint kind is not available on this platform.
    #[error("endpoint kind '{0}' is not supported on this platform")]
    Unsupported(&'static str),

    /// The transport has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

impl TransportError {
    /// The underlying I/O error, if this error wraps one.
    pub fn io_error(&self) -> Option<&std::io::Error> {
        match self {
            TransportError::Bind { source, .. } | TransportError::Connect { source, .. } => {
                Some(source)
            }
            TransportError::Accept(err) | TransportError::Io(err) => Some(err),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors surfaced by the duplex byte pipe.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PipeError {
    /// The reading side completed; nothing written now will be consumed.
    #[error("pipe reader has completed")]
    ReaderCompleted,

    /// The writing side already completed.
    #[error("pipe writer has completed")]
    WriterCompleted,

    /// The writer completed with an error.
    #[error("pipe writer failed: {0}")]
    Failed(Arc<std::io::Error>),
}

/// Broken-pipe class errors raised while a listening handle waits for a peer.
///
/// The accept loop recovers from these by discarding the handle and creating a
/// fresh one.
pub fn is_transient_accept_error(err: &std::io::Error) -> bool {
    use std::io::ErrorKind;

    matches!(
        err.kind(),
        ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
    )
}

/// Errors an I/O object reports once it has been torn down underneath a pending
/// operation.
pub fn is_disposed_error(err: &std::io::Error) -> bool {
    use std::io::ErrorKind;

    matches!(
        err.kind(),
        ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof
    )
}
