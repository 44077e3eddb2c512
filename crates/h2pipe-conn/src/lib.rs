//! HTTP/2 connections served over duplex byte pipes.
//!
//! This is the layer that turns accepted streams into request handling:
//! - [`ConnectionListener`] runs several accept loops over any
//!   [`Transport`](h2pipe_transport::Transport)
//! - [`Connection`] drives one connection through its lifecycle, owning the
//!   header tables, stream map and [`WindowTracker`] on a single task
//! - [`Server`] ties a listener to a [`Handler`] and tracks live connections
//!   so [`ShutdownCoordinator`] can stop them in three escalating phases
//!
//! [`ClientSession`] is a small client for probing a server.

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod flow;
pub mod handler;
pub mod listener;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod stream;
pub mod work_queue;

mod session;
mod writer;

pub use client::{ClientRequest, ClientResponse, ClientSession};
pub use config::{ConnectionOptions, Http2Limits, ListenerOptions, ServerOptions};
pub use connection::{Connection, ConnectionControl, ConnectionOutcome, ConnectionState};
pub use error::{ConnectionError, FlowControlError, Result};
pub use flow::{WindowTarget, WindowTracker};
pub use handler::{handler_fn, Handler, HandlerFn, Request, RequestBody, Response, ResponseBody};
pub use listener::ConnectionListener;
pub use registry::{ConnectionRegistry, RegistryGuard, RegistryKey};
pub use server::{LiveConnection, Server};
pub use shutdown::{Drainable, ShutdownCoordinator, ShutdownOutcome};
pub use stream::StreamState;
pub use work_queue::{work_queue, WorkItem, WorkPoster, WorkReceiver};
