//! WebSocket dialer for the upstream realtime endpoint.

use async_trait::async_trait;
use futures_util::{
    SinkExt as _, StreamExt as _,
    stream::{SplitSink, SplitStream},
};
use http::HeaderMap;
use promptgate_types::{
    CloseReason, DuplexConnection, Frame, FrameKind, FrameSink, FrameSource, GatewayError,
    UpstreamDialer, traits::Result,
};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        Message,
        client::IntoClientRequest as _,
        protocol::{CloseFrame, frame::coding::CloseCode},
    },
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dials upstream sessions with `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsDialer;

#[async_trait]
impl UpstreamDialer for WsDialer {
    async fn dial(&self, url: &str, headers: &HeaderMap) -> Result<Box<dyn DuplexConnection>> {
        let mut request = url
            .into_client_request()
            .map_err(|e| GatewayError::UpstreamDialFailed(e.to_string()))?;
        request.headers_mut().extend(headers.clone());

        let (socket, response) = connect_async(request)
            .await
            .map_err(|e| GatewayError::UpstreamDialFailed(e.to_string()))?;
        tracing::debug!(status = %response.status(), "upstream websocket connected");
        Ok(Box::new(UpstreamSocket(socket)))
    }
}

struct UpstreamSocket(Socket);

impl DuplexConnection for UpstreamSocket {
    fn split(self: Box<Self>) -> (Box<dyn FrameSink>, Box<dyn FrameSource>) {
        let (sink, stream) = self.0.split();
        (Box::new(UpstreamSink(sink)), Box::new(UpstreamSource(stream)))
    }
}

struct UpstreamSink(SplitSink<Socket, Message>);

#[async_trait]
impl FrameSink for UpstreamSink {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        let msg = to_message(frame)?;
        self.0
            .send(msg)
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))
    }

    async fn close(&mut self, reason: CloseReason) -> Result<()> {
        let frame = CloseFrame {
            code: CloseCode::from(reason.code()),
            reason: reason.as_str().to_owned().into(),
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

struct UpstreamSource(SplitStream<Socket>);

#[async_trait]
impl FrameSource for UpstreamSource {
    async fn recv(&mut self) -> Result<Option<Frame>> {
        while let Some(msg) = self.0.next().await {
            let msg = msg.map_err(|e| GatewayError::Transport(e.to_string()))?;
            if let Some(frame) = to_frame(msg) {
                return Ok(Some(frame));
            }
        }
        Ok(None)
    }
}

/// Converts an upstream message; raw frames are never surfaced by reads.
fn to_frame(msg: Message) -> Option<Frame> {
    let frame = match msg {
        Message::Text(text) => Frame::text(text.as_str()),
        Message::Binary(data) => Frame::binary(data),
        Message::Ping(data) => Frame::new(FrameKind::Ping, data),
        Message::Pong(data) => Frame::new(FrameKind::Pong, data),
        Message::Close(close) => Frame::new(
            FrameKind::Close,
            close.map(|c| c.reason.as_str().to_owned()).unwrap_or_default(),
        ),
        Message::Frame(_) => return None,
    };
    Some(frame)
}

fn to_message(frame: Frame) -> Result<Message> {
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
