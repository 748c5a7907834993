//! Upstream event-stream decoding.
//!
//! [`LineDecoder`] reassembles lines from arbitrarily split network chunks;
//! [`classify_line`] turns one line into a [`Line`] the relay acts on.

use promptgate_types::{DONE_SENTINEL, GatewayError, traits::Result};
use serde::Deserialize;

/// Longest line accepted from upstream, terminator included.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Accumulates raw bytes and yields complete lines without their terminator.
///
/// Lines are split on `\n`; a trailing `\r` is stripped so `\r\n` streams
/// decode the same way. Invalid UTF-8 is replaced rather than rejected.
/// A line longer than the limit fails the stream instead of growing the
/// buffer.
#[derive(Debug)]
pub struct LineDecoder {
    buf: Vec<u8>,
    /// Bytes of `buf` already known to hold no `\n`.
    scanned: usize,
    max_line: usize,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl LineDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buf: Vec::new(),
            scanned: 0,
            max_line,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pops the next complete line, if one is buffered.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Transport`] once a line exceeds the limit.
    pub fn next_line(&mut self) -> Result<Option<String>> {
        let Some(offset) = self.buf[self.scanned..].iter().position(|&b| b == b'\n') else {
            self.scanned = self.buf.len();
            self.check_len(self.buf.len())?;
            return Ok(None);
        };
        let nl = self.scanned + offset;
        self.check_len(nl + 1)?;
        let raw: Vec<u8> = self.buf.drain(..=nl).collect();
        self.scanned = 0;
        Ok(Some(decode(&raw)))
    }

    /// Returns the final unterminated line at end of stream, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        self.scanned = 0;
        let raw = std::mem::take(&mut self.buf);
        Some(decode(&raw))
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len > self.max_line {
            return Err(GatewayError::Transport(format!(
                "upstream line exceeds {} bytes",
                self.max_line
            )));
        }
        Ok(())
    }
}

fn decode(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(['\r', '\n'])
        .to_string()
}

/// One streamed chat-completion chunk. Only the fields the relay reads.
#[derive(Debug, Deserialize)]
pub struct CompletionChunk {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub delta: Delta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub content: Option<String>,
}

/// What a single upstream line means to the relay.
#[derive(Debug)]
pub enum Line {
    /// Blank line, comment, `event:`/`id:` field or anything else without data.
    Skip,
    /// The `[DONE]` terminator.
    Done,
    /// A parsed chunk.
    Chunk(CompletionChunk),
    /// A `data:` payload that is not a valid chunk.
    Malformed {
        data: String,
        error: serde_json::Error,
    },
}

/// Classifies one decoded line.
#[must_use]
pub fn classify_line(line: &str) -> Line {
    let Some(data) = line.strip_prefix("data:") else {
        return Line::Skip;
    };
    let data = data.strip_prefix(' ').unwrap_or(data);
    if data.trim() == DONE_SENTINEL {
        return Line::Done;
    }
    match serde_json::from_str::<CompletionChunk>(data) {
        Ok(chunk) => Line::Chunk(chunk),
        Err(error) => Line::Malformed {
            data: data.to_string(),
            error,
        },
    }
}

impl CompletionChunk {
    /// Text delta of the first choice, if it carries any.
    #[must_use]
    pub fn content(&self) -> Option<&str> {
        self.choices.first()?.delta.content.as_deref()
    }

    #[must_use]
    pub fn finish_reason(&self) -> Option<&str> {
        self.choices.first()?.finish_reason.as_deref()
    }
}
