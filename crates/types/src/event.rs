//! Downstream (gateway → client) completion events.
//!
//! Wire format, one event per `data:` line:
//!
//! ```text
//! data: {"content":"Hel"}
//! data: {"content":"lo"}
//! data: [DONE]
//!
//! data: {"metadata":{"model":"gpt-4o-mini"}}
//!
//! ```

use bytes::Bytes;
use serde_json::json;
use std::collections::BTreeMap;

/// Sentinel payload that terminates a completion stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One normalized event in a client-facing completion stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// A piece of generated text.
    Content(String),
    /// End-of-session fields (model, finish reason, ...).
    Metadata(BTreeMap<String, String>),
    /// Terminal marker; emitted exactly once per stream.
    Done,
}

impl SseEvent {
    /// Encodes the event into its downstream wire form.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        match self {
            Self::Content(text) => {
                let body = json!({ "content": text });
                Bytes::from(format!("data: {body}\n"))
            }
            Self::Metadata(fields) => {
                let body = json!({ "metadata": fields });
                Bytes::from(format!("data: {body}\n\n"))
            }
            Self::Done => Bytes::from(format!("data: {DONE_SENTINEL}\n\n")),
        }
    }
}
