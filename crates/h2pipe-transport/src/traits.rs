use std::future::Future;
use std::io;

use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::stream::{ConnectionInfo, IpcStream};

/// A connected stream together with its endpoint descriptors.
#[derive(Debug)]
pub struct Accepted {
    pub stream: IpcStream,
    pub info: ConnectionInfo,
}

/// A listening transport that hands out connected streams.
///
/// Accepting is split in two steps so accept loops can keep a listening handle
/// pending at all times: [`create_handle`](Transport::create_handle) prepares
/// the next handle synchronously, then
/// [`wait_for_connection`](Transport::wait_for_connection) suspends until a
/// peer connects on it. A handle is consumed by the wait whatever the result.
pub trait Transport: Send + Sync + 'static {
    /// A pending listening handle (a named pipe instance, or a share of a
    /// socket listener).
    type Handle: Send + 'static;

    /// Transport label for diagnostics.
    fn transport_name(&self) -> &'static str;

    /// The endpoint this transport listens on.
    fn endpoint(&self) -> &Endpoint;

    /// Create the next pending listening handle.
    fn create_handle(&self) -> Result<Self::Handle>;

    /// Wait for a peer to connect on `handle`.
    fn wait_for_connection(
        &self,
        handle: Self::Handle,
    ) -> impl Future<Output = io::Result<Accepted>> + Send;
}
