//! In-memory duplex connections.
//!
//! [`memory_pair`] returns a [`DuplexConnection`] plus the [`MemoryPeer`]
//! that plays the remote party: frames the peer sends arrive at the
//! connection's source, frames written to the connection's sink arrive at the
//! peer. Closing the sink delivers a close frame carrying the reason text and
//! then hangs up. Dropping the peer's receiver makes writes fail; dropping its
//! sender reads as a disconnect without a close frame.

use async_trait::async_trait;
use promptgate_types::{
    CloseReason, DuplexConnection, Frame, FrameKind, FrameSink, FrameSource, GatewayError,
    traits::Result,
};
use tokio::sync::mpsc;

/// Local half handed to a relay.
pub struct MemoryConnection {
    inbound: mpsc::UnboundedReceiver<Frame>,
    outbound: mpsc::UnboundedSender<Frame>,
}

/// Remote half held by the caller.
pub struct MemoryPeer {
    pub tx: mpsc::UnboundedSender<Frame>,
    pub rx: mpsc::UnboundedReceiver<Frame>,
}

#[must_use]
pub fn memory_pair() -> (MemoryConnection, MemoryPeer) {
    let (peer_tx, inbound) = mpsc::unbounded_channel();
    let (outbound, peer_rx) = mpsc::unbounded_channel();
    (
        MemoryConnection { inbound, outbound },
        MemoryPeer {
            tx: peer_tx,
            rx: peer_rx,
        },
    )
}

impl DuplexConnection for MemoryConnection {
    fn split(self: Box<Self>) -> (Box<dyn FrameSink>, Box<dyn FrameSource>) {
        let Self { inbound, outbound } = *self;
        (
            Box::new(MemorySink {
                outbound: Some(outbound),
            }),
            Box::new(MemorySource { inbound }),
        )
    }
}

struct MemorySink {
    outbound: Option<mpsc::UnboundedSender<Frame>>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        let tx = self
            .outbound
            .as_ref()
            .ok_or_else(|| GatewayError::Transport("connection closed".into()))?;
        tx.send(frame)
            .map_err(|_| GatewayError::Transport("peer went away".into()))
    }

    async fn close(&mut self, reason: CloseReason) -> Result<()> {
        let tx = self
            .outbound
            .take()
            .ok_or_else(|| GatewayError::Transport("connection already closed".into()))?;
        tx.send(Frame::new(FrameKind::Close, reason.as_str()))
            .map_err(|_| GatewayError::Transport("peer went away".into()))
    }
}

struct MemorySource {
    inbound: mpsc::UnboundedReceiver<Frame>,
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn recv(&mut self) -> Result<Option<Frame>> {
        Ok(self.inbound.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let (conn, mut peer) = memory_pair();
        let (mut sink, mut source) = Box::new(conn).split();

        sink.send(Frame::text("out")).await.unwrap();
        assert_eq!(peer.rx.recv().await, Some(Frame::text("out")));

        peer.tx.send(Frame::binary(vec![7])).unwrap();
        assert_eq!(source.recv().await.unwrap(), Some(Frame::binary(vec![7])));
    }

    #[tokio::test]
    async fn test_close_delivers_reason_then_hangs_up() {
        let (conn, mut peer) = memory_pair();
        let (mut sink, _source) = Box::new(conn).split();

        sink.close(CloseReason::IdleTimeout).await.unwrap();
        let close = peer.rx.recv().await.unwrap();
        assert!(close.is_close());
        assert_eq!(&close.payload[..], b"idle timeout");
        assert!(peer.rx.recv().await.is_none());
        assert!(sink.send(Frame::text("late")).await.is_err());
    }

    #[tokio::test]
    async fn test_peer_hangup_reads_as_none() {
        let (conn, peer) = memory_pair();
        let (_sink, mut source) = Box::new(conn).split();
        drop(peer);
        assert_eq!(source.recv().await.unwrap(), None);
    }
}
