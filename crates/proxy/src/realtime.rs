//! Realtime handler: upgrades the client to a WebSocket and runs the relay.

use async_trait::async_trait;
use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{CloseFrame, Message, Utf8Bytes, WebSocket, rejection::WebSocketUpgradeRejection},
    },
    response::Response,
};
use futures_util::{
    SinkExt as _, StreamExt as _,
    stream::{SplitSink, SplitStream},
};
use promptgate_provider::{RealtimeRelay, RealtimeSettings};
use promptgate_types::{
    CloseReason, DuplexConnection, Frame, FrameKind, FrameSink, FrameSource, GatewayError,
    traits::Result as RelayResult,
};
use std::sync::Arc;
use tracing::Instrument as _;

use crate::{AppState, auth::Principal, error::ApiError};

/// Handles `GET /v1/realtime`.
///
/// The caller is authenticated before the upgrade; the upstream is dialed
/// only once the upgrade has completed.
///
/// # Errors
///
/// Returns [`ApiError`] with `UpgradeFailed` if the request is not a valid
/// WebSocket upgrade.
pub async fn realtime(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    let upgrade = upgrade.map_err(|r| GatewayError::UpgradeFailed(r.body_text()))?;

    let config = state.config.load_full();
    let relay = RealtimeRelay::new(
        RealtimeSettings::from_config(&config),
        Arc::clone(&state.dialer),
    );
    let session_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!("realtime", %session_id, subject = %principal.subject);

    Ok(upgrade
        .on_failed_upgrade(|e| tracing::warn!(error = %e, "websocket upgrade failed"))
        .on_upgrade(move |socket| {
            async move {
                if let Err(e) = relay.handle(Box::new(ClientSocket(socket))).await {
                    tracing::warn!(error = %e, "realtime session failed");
                }
            }
            .instrument(span)
        }))
}

/// Client side of a realtime session.
struct ClientSocket(WebSocket);

impl DuplexConnection for ClientSocket {
    fn split(self: Box<Self>) -> (Box<dyn FrameSink>, Box<dyn FrameSource>) {
        let (sink, stream) = self.0.split();
        (Box::new(ClientSink(sink)), Box::new(ClientSource(stream)))
    }
}

struct ClientSink(SplitSink<WebSocket, Message>);

#[async_trait]
impl FrameSink for ClientSink {
    async fn send(&mut self, frame: Frame) -> RelayResult<()> {
        let msg = to_message(frame)?;
        self.0
            .send(msg)
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))
    }

    async fn close(&mut self, reason: CloseReason) -> RelayResult<()> {
        let frame = CloseFrame {
            code: reason.code(),
            reason: Utf8Bytes::from_static(reason.as_str()),
        };
        self.0
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        self.0
            .close()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))
    }
}

struct ClientSource(SplitStream<WebSocket>);

#[async_trait]
impl FrameSource for ClientSource {
    async fn recv(&mut self) -> RelayResult<Option<Frame>> {
        match self.0.next().await {
            Some(Ok(msg)) => Ok(Some(to_frame(msg))),
            Some(Err(e)) => Err(GatewayError::Transport(e.to_string())),
            None => Ok(None),
        }
    }
}

fn to_frame(msg: Message) -> Frame {
    match msg {
        Message::Text(text) => Frame::text(text.as_str()),
        Message::Binary(data) => Frame::binary(data),
        Message::Ping(data) => Frame::new(FrameKind::Ping, data),
        Message::Pong(data) => Frame::new(FrameKind::Pong, data),
        Message::Close(close) => Frame::new(
            FrameKind::Close,
            close.map(|c| c.reason.as_str().to_owned()).unwrap_or_default(),
        ),
    }
}

fn to_message(frame: Frame) -> RelayResult<Message> {
    Ok(match frame.kind {
        FrameKind::Text => {
            let text = String::from_utf8(frame.payload.to_vec())
                .map_err(|e| GatewayError::Transport(format!("text frame is not UTF-8: {e}")))?;
            Message::Text(text.into())
        }
        FrameKind::Binary => Message::Binary(frame.payload),
        FrameKind::Ping => Message::Ping(frame.payload),
        FrameKind::Pong => Message::Pong(frame.payload),
        FrameKind::Close => Message::Close(None),
    })
}
