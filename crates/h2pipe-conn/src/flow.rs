//! Send and receive windows for one connection and its streams.
//!
//! Send windows start at the peer's SETTINGS_INITIAL_WINDOW_SIZE and may go
//! negative after the peer lowers it; nothing is sent on a stream until its
//! window is positive again. Receive windows are replenished in batches once
//! half of a window has been consumed by the application.

use std::collections::HashMap;

use h2pipe_frame::MAX_WINDOW_SIZE;

use crate::error::FlowControlError;

/// What a window update applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowTarget {
    Connection,
    Stream(u32),
}

impl WindowTarget {
    /// Stream identifier as written on the wire; 0 for the connection.
    pub fn stream_id(self) -> u32 {
        match self {
            WindowTarget::Connection => 0,
            WindowTarget::Stream(id) => id,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    available: i64,
    /// Consumed by the application but not yet returned to the peer.
    unacknowledged: u32,
}

impl Window {
    fn new(size: u32) -> Self {
        Self {
            available: i64::from(size),
            unacknowledged: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct StreamWindows {
    send: Window,
    recv: Window,
}

/// Window bookkeeping for a connection.
#[derive(Debug, Clone)]
pub struct WindowTracker {
    connection_send: Window,
    connection_recv: Window,
    connection_recv_size: u32,
    initial_send: u32,
    initial_recv: u32,
    streams: HashMap<u32, StreamWindows>,
}

impl WindowTracker {
    /// `initial_send` is the peer's initial stream window, `initial_recv` the
    /// one we advertised and `connection_recv` our connection receive window.
    pub fn new(initial_send: u32, initial_recv: u32, connection_recv: u32) -> Self {
        Self {
            connection_send: Window::new(h2pipe_frame::DEFAULT_INITIAL_WINDOW_SIZE),
            connection_recv: Window::new(connection_recv),
            connection_recv_size: connection_recv,
            initial_send,
            initial_recv,
            streams: HashMap::new(),
        }
    }

    pub fn add_stream(&mut self, stream_id: u32) {
        self.streams.insert(
            stream_id,
            StreamWindows {
                send: Window::new(self.initial_send),
                recv: Window::new(self.initial_recv),
            },
        );
    }

    pub fn remove_stream(&mut self, stream_id: u32) {
        self.streams.remove(&stream_id);
    }

    /// Current send window. Unknown streams report `None`.
    pub fn send_window(&self, target: WindowTarget) -> Option<i64> {
        match target {
            WindowTarget::Connection => Some(self.connection_send.available),
            WindowTarget::Stream(id) => self.streams.get(&id).map(|w| w.send.available),
        }
    }

    /// Current receive window. Unknown streams report `None`.
    pub fn recv_window(&self, target: WindowTarget) -> Option<i64> {
        match target {
            WindowTarget::Connection => Some(self.connection_recv.available),
            WindowTarget::Stream(id) => self.streams.get(&id).map(|w| w.recv.available),
        }
    }

    /// Reserve up to `wanted` bytes of DATA on a stream. Returns how many may
    /// be sent now, bounded by both the stream and the connection window.
    pub fn try_reserve(&mut self, stream_id: u32, wanted: usize) -> usize {
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return 0;
        };
        let available = stream.send.available.min(self.connection_send.available);
        if available <= 0 {
            return 0;
        }
        let granted = wanted.min(available as usize);
        stream.send.available -= granted as i64;
        self.connection_send.available -= granted as i64;
        granted
    }

    /// Apply a WINDOW_UPDATE from the peer. Updates for unknown streams are
    /// ignored; the caller decides whether the stream was ever valid.
    pub fn on_window_update(
        &mut self,
        target: WindowTarget,
        increment: u32,
    ) -> Result<(), FlowControlError> {
        let window = match target {
            WindowTarget::Connection => &mut self.connection_send,
            WindowTarget::Stream(id) => match self.streams.get_mut(&id) {
                Some(stream) => &mut stream.send,
                None => return Ok(()),
            },
        };
        let updated = window.available + i64::from(increment);
        if updated > i64::from(MAX_WINDOW_SIZE) {
            return Err(match target {
                WindowTarget::Connection => FlowControlError::ConnectionOverflow,
                WindowTarget::Stream(stream_id) => FlowControlError::StreamOverflow { stream_id },
            });
        }
        window.available = updated;
        Ok(())
    }

    /// Apply a new SETTINGS_INITIAL_WINDOW_SIZE from the peer to every open
    /// stream's send window.
    pub fn on_settings_change(&mut self, initial_send: u32) -> Result<(), FlowControlError> {
        let delta = i64::from(initial_send) - i64::from(self.initial_send);
        if self
            .streams
            .values()
            .any(|w| w.send.available + delta > i64::from(MAX_WINDOW_SIZE))
        {
            return Err(FlowControlError::ConnectionOverflow);
        }
        for windows in self.streams.values_mut() {
            windows.send.available += delta;
        }
        self.initial_send = initial_send;
        Ok(())
    }

    /// Account for `len` bytes of DATA (padding included) from the peer.
    pub fn on_data_received(&mut self, stream_id: u32, len: u32) -> Result<(), FlowControlError> {
        let len = i64::from(len);
        if self.connection_recv.available < len {
            return Err(FlowControlError::ConnectionReceiveExceeded);
        }
        self.connection_recv.available -= len;
        if let Some(stream) = self.streams.get_mut(&stream_id) {
            if stream.recv.available < len {
                return Err(FlowControlError::StreamReceiveExceeded { stream_id });
            }
            stream.recv.available -= len;
        }
        Ok(())
    }

    /// Return `len` consumed bytes to the receive windows. Yields the
    /// WINDOW_UPDATE frames that are due, connection first.
    pub fn release(&mut self, stream_id: u32, len: u32) -> Vec<(WindowTarget, u32)> {
        let mut updates = Vec::new();
        if len == 0 {
            return updates;
        }

        if let Some(increment) = replenish(
            &mut self.connection_recv,
            len,
            self.connection_recv_size,
        ) {
            updates.push((WindowTarget::Connection, increment));
        }
        if let Some(stream) = self.streams.get_mut(&stream_id) {
            if let Some(increment) = replenish(&mut stream.recv, len, self.initial_recv) {
                updates.push((WindowTarget::Stream(stream_id), increment));
            }
        }
        updates
    }
}

fn replenish(window: &mut Window, len: u32, size: u32) -> Option<u32> {
    window.unacknowledged = window.unacknowledged.saturating_add(len);
    if window.unacknowledged < size / 2 {
        return None;
    }
    let increment = window.unacknowledged;
    window.unacknowledged = 0;
    window.available += i64::from(increment);
    Some(increment)
}
