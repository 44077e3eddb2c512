use std::io;
use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};
use crate::stream::{ConnectionInfo, IpcStream};
use crate::traits::{Accepted, Transport};

/// TCP transport. Accepted sockets have `TCP_NODELAY` set.
pub struct TcpTransport {
    listener: TcpListener,
    endpoint: Endpoint,
}

impl TcpTransport {
    /// Bind to `addr` (`host:port`; port 0 picks an ephemeral port).
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind {
                endpoint: format!("tcp:{addr}"),
                source,
            })?;
        let local = listener.local_addr()?;
        info!(%local, "listening on tcp");
        Ok(Self {
            listener,
            endpoint: Endpoint::Tcp(local.to_string()),
        })
    }

    /// The bound local address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

impl Transport for TcpTransport {
    type Handle = ();

    fn transport_name(&self) -> &'static str {
        "tcp"
    }

    /// The bound endpoint, with the ephemeral port resolved.
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn create_handle(&self) -> Result<Self::Handle> {
        Ok(())
    }

    async fn wait_for_connection(&self, _handle: Self::Handle) -> io::Result<Accepted> {
        let (stream, remote) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        let local = stream.local_addr()?;
        debug!(%remote, "accepted tcp connection");
        Ok(Accepted {
            stream: IpcStream::from_tcp(stream),
            info: ConnectionInfo::new(format!("tcp:{local}"), format!("tcp:{remote}")),
        })
    }
}
