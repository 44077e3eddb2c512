//! In-process transport over `tokio::io::duplex` streams.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::DuplexStream;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};
use crate::stream::{ConnectionInfo, IpcStream};
use crate::traits::{Accepted, Transport};

const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;
const BACKLOG: usize = 16;

struct PendingConnection {
    stream: DuplexStream,
    client_id: u64,
}

/// Listening side of an in-process endpoint.
pub struct MemoryTransport {
    endpoint: Endpoint,
    buffer_size: usize,
    sender: mpsc::Sender<PendingConnection>,
    incoming: Mutex<mpsc::Receiver<PendingConnection>>,
    next_client_id: Arc<AtomicU64>,
}

impl MemoryTransport {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_buffer_size(name, DEFAULT_BUFFER_SIZE)
    }

    /// Use `buffer_size` bytes of in-flight capacity per direction.
    pub fn with_buffer_size(name: impl Into<String>, buffer_size: usize) -> Self {
        let (sender, incoming) = mpsc::channel(BACKLOG);
        Self {
            endpoint: Endpoint::Memory(name.into()),
            buffer_size,
            sender,
            incoming: Mutex::new(incoming),
            next_client_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// A handle clients use to connect to this transport.
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            endpoint: self.endpoint.clone(),
            buffer_size: self.buffer_size,
            sender: self.sender.clone(),
            next_client_id: Arc::clone(&self.next_client_id),
        }
    }
}

impl Transport for MemoryTransport {
    type Handle = ();

    fn transport_name(&self) -> &'static str {
        "memory"
    }

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn create_handle(&self) -> Result<Self::Handle> {
        Ok(())
    }

    async fn wait_for_connection(&self, _handle: Self::Handle) -> io::Result<Accepted> {
        let pending = self.incoming.lock().await.recv().await;
        // The transport holds a sender itself, so the channel only closes on drop.
        let pending = pending.ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        debug!(client_id = pending.client_id, "accepted in-process connection");
        Ok(Accepted {
            stream: IpcStream::from_memory(pending.stream),
            info: ConnectionInfo::new(
                self.endpoint.to_string(),
                format!("memory:client-{}", pending.client_id),
            ),
        })
    }
}

/// Client side of an in-process endpoint.
#[derive(Clone)]
pub struct MemoryConnector {
    endpoint: Endpoint,
    buffer_size: usize,
    sender: mpsc::Sender<PendingConnection>,
    next_client_id: Arc<AtomicU64>,
}

impl MemoryConnector {
    /// Open a new connection. Fails once the transport has been dropped.
    pub async fn connect(&self) -> Result<IpcStream> {
        let (client, server) = tokio::io::duplex(self.buffer_size);
        let client_id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        self.sender
            .send(PendingConnection {
                stream: server,
                client_id,
            })
            .await
            .map_err(|_| TransportError::Connect {
                endpoint: self.endpoint.to_string(),
                source: io::Error::from(io::ErrorKind::ConnectionRefused),
            })?;
        Ok(IpcStream::from_memory(client))
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}
