//! Connection transports and per-connection byte plumbing.
//!
//! Provides:
//! - [`Endpoint`] descriptors and the [`Transport`] trait, implemented for
//!   Unix domain sockets, TCP, Windows named pipes and in-process streams
//! - the duplex byte [`pipe`] with backpressure that decouples socket I/O from
//!   protocol processing
//! - [`DuplexDriver`], the receive and send loops that move bytes between a
//!   physical stream and a connection's pipes
//!
//! This is the lowest layer of h2pipe. Everything else builds on top of the
//! [`IpcStream`] and [`DuplexPipe`] types provided here.

pub mod driver;
pub mod endpoint;
pub mod error;
pub mod memory;
pub mod pipe;
pub mod stream;
pub mod tcp;
pub mod traits;

#[cfg(unix)]
pub mod uds;

#[cfg(windows)]
pub mod named_pipe;

pub use driver::{DriverHandle, DuplexDriver};
pub use endpoint::Endpoint;
pub use error::{PipeError, Result, TransportError};
pub use memory::{MemoryConnector, MemoryTransport};
pub use pipe::{
    duplex_pair, pipe, DuplexPipe, FlushResult, PipeOptions, PipeReader, PipeWriter, ReadResult,
    TransportPipe,
};
pub use stream::{connect, ConnectionInfo, IpcStream, PeerCredentials};
pub use tcp::TcpTransport;
pub use traits::{Accepted, Transport};

#[cfg(unix)]
pub use uds::UnixSocketTransport;

#[cfg(windows)]
pub use named_pipe::NamedPipeTransport;
