//! Duplex (WebSocket) frame model shared by the client and upstream sides.

use bytes::Bytes;
use std::fmt;

/// Frame type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Text,
    Binary,
    Ping,
    Pong,
    /// Peer-initiated close; the payload carries the close reason, if any.
    Close,
}

/// One unit of a duplex protocol.
///
/// Frames are forwarded verbatim between the two sides of a realtime session.
/// The only frame the gateway builds itself is the initial `session.update`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub payload: Bytes,
}

impl Frame {
    #[must_use]
    pub fn new(kind: FrameKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        let text: String = text.into();
        Self::new(FrameKind::Text, text)
    }

    #[must_use]
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(FrameKind::Binary, payload)
    }

    /// Returns the payload as UTF-8 if this is a text frame.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self.kind {
            FrameKind::Text => std::str::from_utf8(&self.payload).ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_close(&self) -> bool {
        self.kind == FrameKind::Close
    }
}

/// Reason attached to a close frame the gateway sends on teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    ClientDisconnected,
    UpstreamDisconnected,
    ForwardFailed,
    UpstreamConnectFailed,
    IdleTimeout,
    SessionExpired,
}

impl CloseReason {
    /// Human-readable reason string carried in the close frame.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientDisconnected => "client disconnected",
            Self::UpstreamDisconnected => "upstream disconnected",
            Self::ForwardFailed => "failed to forward frame",
            Self::UpstreamConnectFailed => "failed to connect upstream",
            Self::IdleTimeout => "idle timeout",
            Self::SessionExpired => "session expired",
        }
    }

    /// RFC 6455 close status code.
    #[must_use]
    pub fn code(self) -> u16 {
        match self {
            // 1001 going away
            Self::ClientDisconnected
            | Self::UpstreamDisconnected
            | Self::IdleTimeout
            | Self::SessionExpired => 1001,
            // 1011 internal error
            Self::ForwardFailed | Self::UpstreamConnectFailed => 1011,
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
