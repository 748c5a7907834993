//! Core types and traits for the promptgate workspace.
//!
//! This crate defines the shared abstractions used across all layers of the
//! gateway: the unified error taxonomy, the downstream SSE event model, the
//! duplex frame model, realtime session parameters, and the async traits the
//! relays are written against.

pub mod error;
pub mod event;
pub mod frame;
pub mod session;
pub mod traits;

pub use error::{AuthError, GatewayError};
pub use event::{DONE_SENTINEL, SseEvent};
pub use frame::{CloseReason, Frame, FrameKind};
pub use session::{AudioTranscription, SessionConfig};
pub use traits::{
    ByteStream, DuplexConnection, EventSink, FrameSink, FrameSource, TokenValidator,
    UpstreamDialer,
};
