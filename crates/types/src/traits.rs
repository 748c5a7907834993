//! Async traits shared across all promptgate crates.
//!
//! Every cross-crate abstraction is defined here so that higher layers depend
//! only on `promptgate-types`, not on each other.

use crate::{AuthError, CloseReason, Frame};
use async_trait::async_trait;
use bytes::Bytes;
use futures_core::Stream;
use http::HeaderMap;
use std::pin::Pin;

pub use crate::error::Result;

/// A pinned, sendable stream of raw upstream body chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Flushable downstream writer for completion events.
///
/// `write` may buffer; `flush` must hand everything written so far to the
/// client before returning.
#[async_trait]
pub trait EventSink: Send {
    async fn write(&mut self, chunk: Bytes) -> Result<()>;
    async fn flush(&mut self) -> Result<()>;
}

/// Read half of a duplex connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Reads the next frame. `Ok(None)` means the peer went away without a
    /// close frame; a received close frame is returned as a [`Frame`] of kind
    /// [`FrameKind::Close`](crate::FrameKind::Close).
    async fn recv(&mut self) -> Result<Option<Frame>>;
}

/// Write half of a duplex connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Writes one frame verbatim.
    async fn send(&mut self, frame: Frame) -> Result<()>;
    /// Sends a close frame carrying `reason`, then shuts the write side down.
    async fn close(&mut self, reason: CloseReason) -> Result<()>;
}

/// A duplex connection that can be split into independently owned halves.
///
/// Used identically for the client side and the upstream side of a realtime
/// session.
pub trait DuplexConnection: Send {
    fn split(self: Box<Self>) -> (Box<dyn FrameSink>, Box<dyn FrameSource>);
}

/// Opens the upstream side of a realtime session.
#[async_trait]
pub trait UpstreamDialer: Send + Sync {
    /// Dials `url` sending `headers` with the handshake.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::UpstreamDialFailed`](crate::GatewayError::UpstreamDialFailed) if the handshake fails.
    async fn dial(&self, url: &str, headers: &HeaderMap) -> Result<Box<dyn DuplexConnection>>;
}

/// Validates bearer tokens, returning the subject identifier.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    async fn validate(&self, token: &str) -> std::result::Result<String, AuthError>;
}
