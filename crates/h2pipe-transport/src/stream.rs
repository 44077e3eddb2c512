use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::debug;

use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};

/// A connected duplex byte stream, the physical half of every connection.
///
/// On Unix this wraps a Unix domain socket, on Windows a named pipe instance;
/// TCP and in-process streams are available everywhere.
pub struct IpcStream {
    inner: IpcStreamInner,
}

enum IpcStreamInner {
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
    Tcp(tokio::net::TcpStream),
    Memory(tokio::io::DuplexStream),
    #[cfg(windows)]
    PipeServer(tokio::net::windows::named_pipe::NamedPipeServer),
    #[cfg(windows)]
    PipeClient(tokio::net::windows::named_pipe::NamedPipeClient),
}

macro_rules! delegate {
    ($self:ident, $stream:ident => $body:expr) => {
        match &mut $self.get_mut().inner {
            #[cfg(unix)]
            IpcStreamInner::Unix($stream) => $body,
            IpcStreamInner::Tcp($stream) => $body,
            IpcStreamInner::Memory($stream) => $body,
            #[cfg(windows)]
            IpcStreamInner::PipeServer($stream) => $body,
            #[cfg(windows)]
            IpcStreamInner::PipeClient($stream) => $body,
        }
    };
}

impl AsyncRead for IpcStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        delegate!(self, stream => Pin::new(stream).poll_read(cx, buf))
    }
}

impl AsyncWrite for IpcStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        delegate!(self, stream => Pin::new(stream).poll_write(cx, buf))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        delegate!(self, stream => Pin::new(stream).poll_flush(cx))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        delegate!(self, stream => Pin::new(stream).poll_shutdown(cx))
    }
}

impl IpcStream {
    #[cfg(unix)]
    pub(crate) fn from_unix(stream: tokio::net::UnixStream) -> Self {
        Self {
            inner: IpcStreamInner::Unix(stream),
        }
    }

    pub(crate) fn from_tcp(stream: tokio::net::TcpStream) -> Self {
        Self {
            inner: IpcStreamInner::Tcp(stream),
        }
    }

    /// Wrap one half of an in-process duplex stream.
    pub fn from_memory(stream: tokio::io::DuplexStream) -> Self {
        Self {
            inner: IpcStreamInner::Memory(stream),
        }
    }

    #[cfg(windows)]
    pub(crate) fn from_pipe_server(
        pipe: tokio::net::windows::named_pipe::NamedPipeServer,
    ) -> Self {
        Self {
            inner: IpcStreamInner::PipeServer(pipe),
        }
    }

    #[cfg(windows)]
    pub(crate) fn from_pipe_client(
        pipe: tokio::net::windows::named_pipe::NamedPipeClient,
    ) -> Self {
        Self {
            inner: IpcStreamInner::PipeClient(pipe),
        }
    }

    /// Transport label for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(_) => "unix-domain-socket",
            IpcStreamInner::Tcp(_) => "tcp",
            IpcStreamInner::Memory(_) => "memory",
            #[cfg(windows)]
            IpcStreamInner::PipeServer(_) | IpcStreamInner::PipeClient(_) => "named-pipe",
        }
    }

    /// Credentials of the connected peer as `(uid, gid, pid)`.
    ///
    /// Only Unix domain sockets expose them; `pid` is unavailable on some
    /// platforms.
    pub fn peer_credentials(&self) -> Option<PeerCredentials> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.peer_cred().ok().map(|cred| PeerCredentials {
                uid: cred.uid(),
                gid: cred.gid(),
                pid: cred.pid(),
            }),
            _ => None,
        }
    }
}

impl std::fmt::Debug for IpcStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcStream")
            .field("type", &self.transport_name())
            .finish()
    }
}

/// Unix peer credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerCredentials {
    pub uid: u32,
    pub gid: u32,
    pub pid: Option<i32>,
}

/// Local and remote descriptors of an accepted connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub local: String,
    pub remote: String,
    pub peer_credentials: Option<PeerCredentials>,
}

impl ConnectionInfo {
    pub fn new(local: impl Into<String>, remote: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            remote: remote.into(),
            peer_credentials: None,
        }
    }
}

/// Connect to a listening endpoint as a client.
///
/// In-process endpoints are reached through
/// [`MemoryConnector`](crate::memory::MemoryConnector) instead.
pub async fn connect(endpoint: &Endpoint) -> Result<IpcStream> {
    let connect_error = |source| TransportError::Connect {
        endpoint: endpoint.to_string(),
        source,
    };

    match endpoint {
        #[cfg(unix)]
        Endpoint::Unix(path) => {
            let stream = tokio::net::UnixStream::connect(path)
                .await
                .map_err(connect_error)?;
            debug!(?path, "connected to unix domain socket");
            Ok(IpcStream::from_unix(stream))
        }
        #[cfg(not(unix))]
        Endpoint::Unix(_) => Err(TransportError::Unsupported("unix")),
        Endpoint::Tcp(addr) => {
            let stream = tokio::net::TcpStream::connect(addr.as_str())
                .await
                .map_err(connect_error)?;
            stream.set_nodelay(true).map_err(connect_error)?;
            debug!(%addr, "connected to tcp endpoint");
            Ok(IpcStream::from_tcp(stream))
        }
        #[cfg(windows)]
        Endpoint::NamedPipe { .. } => {
            let path = endpoint.pipe_path().unwrap_or_default();
            let client = tokio::net::windows::named_pipe::ClientOptions::new()
                .open(&path)
                .map_err(connect_error)?;
            debug!(%path, "connected to named pipe");
            Ok(IpcStream::from_pipe_client(client))
        }
        #[cfg(not(windows))]
        Endpoint::NamedPipe { .. } => Err(TransportError::Unsupported("pipe")),
        Endpoint::Memory(_) => Err(TransportError::Unsupported("memory")),
    }
}
