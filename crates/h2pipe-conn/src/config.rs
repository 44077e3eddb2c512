use std::time::Duration;

use h2pipe_frame::{Settings, DEFAULT_MAX_FRAME_SIZE};
use h2pipe_transport::PipeOptions;

/// Protocol limits a server advertises and enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Http2Limits {
    /// SETTINGS_HEADER_TABLE_SIZE for our decoder, and the cap on our encoder.
    pub header_table_size: u32,
    /// SETTINGS_MAX_CONCURRENT_STREAMS. Streams past it are refused.
    pub max_concurrent_streams: u32,
    /// SETTINGS_INITIAL_WINDOW_SIZE: per-stream receive window.
    pub initial_stream_window: u32,
    /// Connection receive window. Values above 65535 are announced with a
    /// WINDOW_UPDATE right after the server preface.
    pub connection_window: u32,
    /// SETTINGS_MAX_FRAME_SIZE: largest frame accepted from the peer.
    pub max_frame_size: u32,
    /// SETTINGS_MAX_HEADER_LIST_SIZE. Larger requests get a 431 response.
    pub max_header_list_size: u32,
}

impl Default for Http2Limits {
    fn default() -> Self {
        Self {
            header_table_size: 4096,
            max_concurrent_streams: 100,
            initial_stream_window: 65_535,
            connection_window: 65_535,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE as u32,
            max_header_list_size: 32 * 1024,
        }
    }
}

impl Http2Limits {
    /// The settings advertised in the server preface.
    pub fn local_settings(&self) -> Settings {
        Settings {
            header_table_size: self.header_table_size,
            max_concurrent_streams: Some(self.max_concurrent_streams),
            initial_window_size: self.initial_stream_window,
            max_frame_size: self.max_frame_size,
            max_header_list_size: Some(self.max_header_list_size),
            ..Settings::default()
        }
    }
}

/// Per-connection behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionOptions {
    pub limits: Http2Limits,
    /// Thresholds for bytes received from the peer and not yet parsed.
    pub input_pipe: PipeOptions,
    /// Thresholds for bytes produced for the peer and not yet written.
    pub output_pipe: PipeOptions,
    /// How long in-flight streams may run once draining starts.
    pub drain_timeout: Duration,
    /// How long a connection may sit without open streams, counting the
    /// wait for the preface, before it is closed gracefully.
    pub keep_alive_timeout: Duration,
    /// How long a header block may stay unfinished while waiting for
    /// CONTINUATION frames.
    pub request_headers_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            limits: Http2Limits::default(),
            input_pipe: PipeOptions::default(),
            output_pipe: PipeOptions::default(),
            drain_timeout: Duration::from_secs(5),
            keep_alive_timeout: Duration::from_secs(130),
            request_headers_timeout: Duration::from_secs(30),
        }
    }
}

/// Listener behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerOptions {
    /// Independent accept loops, each keeping one listening handle pending.
    pub accept_loops: usize,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        let cores = std::thread::available_parallelism().map_or(1, |n| n.get());
        Self {
            accept_loops: cores.clamp(1, 16),
        }
    }
}

/// Hosting configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerOptions {
    pub listener: ListenerOptions,
    pub connection: ConnectionOptions,
    /// Total budget for the three shutdown phases.
    pub shutdown_timeout: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            listener: ListenerOptions::default(),
            connection: ConnectionOptions::default(),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}
