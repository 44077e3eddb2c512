use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::net::windows::named_pipe::{NamedPipeServer, ServerOptions};
use tracing::{debug, info};

use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};
use crate::stream::{ConnectionInfo, IpcStream};
use crate::traits::{Accepted, Transport};

/// Windows named pipe transport.
///
/// Every listening handle is its own server instance of the pipe. The first
/// instance is created with `FILE_FLAG_FIRST_PIPE_INSTANCE` so that binding
/// fails if another process already owns the name.
pub struct NamedPipeTransport {
    endpoint: Endpoint,
    path: String,
    first_created: AtomicBool,
}

impl NamedPipeTransport {
    pub fn bind(endpoint: Endpoint) -> Result<Self> {
        let path = endpoint
            .pipe_path()
            .ok_or(TransportError::InvalidEndpoint {
                input: endpoint.to_string(),
                reason: "not a named pipe endpoint",
            })?;
        info!(%path, "listening on named pipe");
        Ok(Self {
            endpoint,
            path,
            first_created: AtomicBool::new(false),
        })
    }
}

impl Transport for NamedPipeTransport {
    type Handle = NamedPipeServer;

    fn transport_name(&self) -> &'static str {
        "named-pipe"
    }

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn create_handle(&self) -> Result<Self::Handle> {
        let first = !self.first_created.swap(true, Ordering::AcqRel);
        ServerOptions::new()
            .first_pipe_instance(first)
            .create(&self.path)
            .map_err(|source| TransportError::Bind {
                endpoint: self.endpoint.to_string(),
                source,
            })
    }

    async fn wait_for_connection(&self, handle: Self::Handle) -> io::Result<Accepted> {
        handle.connect().await?;
        debug!(path = %self.path, "named pipe client connected");
        Ok(Accepted {
            stream: IpcStream::from_pipe_server(handle),
            info: ConnectionInfo::new(self.endpoint.to_string(), self.endpoint.to_string()),
        })
    }
}
