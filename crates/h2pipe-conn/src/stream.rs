//! Server-side stream states (RFC 9113 section 5.1, without push).

use std::fmt;

/// Lifecycle of one client-initiated stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Open,
    /// We sent END_STREAM; the peer may still send DATA.
    HalfClosedLocal,
    /// The peer sent END_STREAM; we may still send.
    HalfClosedRemote,
    Closed,
}

impl StreamState {
    /// Request HEADERS arrived on an idle stream.
    pub fn recv_headers(self, end_stream: bool) -> Option<Self> {
        match self {
            StreamState::Idle if end_stream => Some(StreamState::HalfClosedRemote),
            StreamState::Idle => Some(StreamState::Open),
            _ => None,
        }
    }

    /// The peer ended its side, with DATA or trailers.
    pub fn recv_end_stream(self) -> Option<Self> {
        match self {
            StreamState::Open => Some(StreamState::HalfClosedRemote),
            StreamState::HalfClosedLocal => Some(StreamState::Closed),
            _ => None,
        }
    }

    /// We ended our side.
    pub fn send_end_stream(self) -> Option<Self> {
        match self {
            StreamState::Open => Some(StreamState::HalfClosedLocal),
            StreamState::HalfClosedRemote => Some(StreamState::Closed),
            _ => None,
        }
    }

    /// Whether DATA or trailers from the peer are acceptable.
    pub fn can_recv(self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedLocal)
    }

    /// Whether we may still send HEADERS or DATA.
    pub fn can_send(self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedRemote)
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamState::Idle => "idle",
            StreamState::Open => "open",
            StreamState::HalfClosedLocal => "half-closed (local)",
            StreamState::HalfClosedRemote => "half-closed (remote)",
            StreamState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_then_response() {
        let state = StreamState::Idle.recv_headers(false).unwrap();
        assert_eq!(state, StreamState::Open);
        assert!(state.can_recv() && state.can_send());

        let state = state.recv_end_stream().unwrap();
        assert_eq!(state, StreamState::HalfClosedRemote);
        assert!(!state.can_recv());

        assert_eq!(state.send_end_stream(), Some(StreamState::Closed));
    }

    #[test]
    fn response_before_request_body_ends() {
        let state = StreamState::Open.send_end_stream().unwrap();
        assert_eq!(state, StreamState::HalfClosedLocal);
        assert!(state.can_recv() && !state.can_send());
        assert_eq!(state.recv_end_stream(), Some(StreamState::Closed));
    }

    #[test]
    fn invalid_transitions() {
        assert_eq!(StreamState::Open.recv_headers(true), None);
        assert_eq!(StreamState::Idle.recv_end_stream(), None);
        assert_eq!(StreamState::Closed.send_end_stream(), None);
        assert_eq!(StreamState::HalfClosedRemote.recv_end_stream(), None);
        assert_eq!(
            StreamState::Idle.recv_headers(true),
            Some(StreamState::HalfClosedRemote)
        );
        assert_eq!(StreamState::HalfClosedLocal.to_string(), "half-closed (local)");
    }
}
