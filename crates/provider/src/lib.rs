//! Streaming relays between clients and the AI provider.
//!
//! - [`CompletionRelay`] opens a streaming chat completion and re-encodes its
//!   delta stream as normalized [`SseEvent`](promptgate_types::SseEvent)s.
//! - [`RealtimeRelay`] bridges a client duplex connection to an upstream
//!   realtime session with two frame pumps.
//!
//! Both relays take explicit settings resolved from a configuration snapshot
//! at construction time.

pub mod completion;
pub mod http_util;
#[cfg(test)]
mod memory;
pub mod realtime;
pub mod sse;
pub mod upstream;

pub use completion::{CompletionRelay, CompletionSettings, CompletionStream};
pub use http_util::ProviderHttp;
pub use realtime::{RealtimeRelay, RealtimeSettings, SessionSummary};
pub use upstream::WsDialer;
