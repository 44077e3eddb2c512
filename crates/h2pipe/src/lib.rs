//! HTTP/2 server core over sockets and named pipes.
//!
//! h2pipe accepts connections on Unix domain sockets, TCP, Windows named pipes
//! or in-process endpoints, and serves HTTP/2 on each one: frames are parsed
//! straight out of a backpressured byte pipe, headers go through HPACK with a
//! bounded dynamic table, and DATA is gated by credit-based flow control.
//!
//! # Crate Structure
//!
//! - [`transport`]: Endpoints, transports, the duplex byte pipe and its driver
//! - [`frame`]: HTTP/2 frame codec and SETTINGS
//! - [`hpack`]: Header compression
//! - [`conn`]: Connections, listener, flow control, server and shutdown

/// Re-export transport types.
pub mod transport {
    pub use h2pipe_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use h2pipe_frame::*;
}

/// Re-export header compression types.
pub mod hpack {
    pub use h2pipe_hpack::*;
}

/// Re-export connection and server types.
pub mod conn {
    pub use h2pipe_conn::*;
}

pub use h2pipe_conn::{
    handler_fn, ClientRequest, ClientResponse, ClientSession, Handler, Request, Response, Server,
    ServerOptions, ShutdownOutcome,
};
pub use h2pipe_transport::Endpoint;
