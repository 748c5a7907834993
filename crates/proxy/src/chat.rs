//! Chat completion handler: relays one prompt as an SSE stream.

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{Query, State},
    http::header::{CACHE_CONTROL, CONTENT_TYPE, HeaderName},
    response::{IntoResponse, Response},
};
use bytes::{Bytes, BytesMut};
use promptgate_provider::{CompletionRelay, CompletionSettings};
use promptgate_types::{EventSink, GatewayError, traits::Result as RelayResult};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument as _;

use crate::{AppState, auth::Principal, error::ApiError};

type BodyChunk = std::result::Result<Bytes, std::io::Error>;

/// Query parameters of `GET /v1/chat_bot`.
#[derive(Debug, Deserialize)]
pub struct ChatQuery {
    #[serde(default)]
    pub prompt: Option<String>,
}

/// Handles `GET /v1/chat_bot?prompt=...`.
///
/// The upstream request is opened before the response starts, so upstream
/// failures still produce a JSON error. After that the relay runs in its own
/// task, feeding the response body through a bounded channel.
///
/// # Errors
///
/// Returns [`ApiError`] if the prompt is missing or the upstream request
/// cannot be opened.
pub async fn chat_bot(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Query(query): Query<ChatQuery>,
) -> Result<Response, ApiError> {
    let prompt = query
        .prompt
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| GatewayError::BadRequest("missing query parameter: prompt".into()))?;

    let config = state.config.load_full();
    let relay = CompletionRelay::new(
        state.http.clone(),
        CompletionSettings::from_config(&config),
    );
    tracing::info!(
        subject = %principal.subject,
        model = %config.completions.model,
        "chat completion request"
    );

    let stream = relay.send(&prompt).await?;

    let (tx, rx) = mpsc::channel(config.completions.sink_capacity.max(1));
    tokio::spawn(
        async move {
            let mut sink = ChannelSink::new(tx);
            if let Err(e) = stream.receive(&mut sink).await {
                tracing::warn!(error = %e, "completion stream aborted");
                sink.abort(&e).await;
            }
        }
        .in_current_span(),
    );

    Ok((
        [
            (CONTENT_TYPE, "text/event-stream"),
            (CACHE_CONTROL, "no-cache"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Body::from_stream(ReceiverStream::new(rx)),
    )
        .into_response())
}

/// [`EventSink`] feeding an HTTP response body.
///
/// Writes accumulate locally; `flush` hands them to the body channel and
/// waits while the channel is full.
pub struct ChannelSink {
    tx: mpsc::Sender<BodyChunk>,
    buf: BytesMut,
}

impl ChannelSink {
    #[must_use]
    pub fn new(tx: mpsc::Sender<BodyChunk>) -> Self {
        Self {
            tx,
            buf: BytesMut::new(),
        }
    }

    /// Fails the response body so the client sees a truncated stream rather
    /// than a clean end.
    pub async fn abort(&mut self, err: &GatewayError) {
        let _ = self
            .tx
            .send(Err(std::io::Error::other(err.to_string())))
            .await;
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn write(&mut self, chunk: Bytes) -> RelayResult<()> {
        self.buf.extend_from_slice(&chunk);
        Ok(())
    }

    async fn flush(&mut self) -> RelayResult<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = self.buf.split().freeze();
        self.tx
            .send(Ok(chunk))
            .await
            .map_err(|_| GatewayError::Transport("client disconnected".into()))
    }
}
