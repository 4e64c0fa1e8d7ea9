use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tracing::trace;

use crate::control::Acknowledgment;
use crate::reliability::ReliabilityManager;
use crate::transport::Transport;
use crate::wire::codec::WireCodec;
use crate::wire::message_kind::MessageKind;

/// The outbound path shared by user sends, acknowledgments, heartbeats and handshake replies:
///  allocate a sequence number, frame, register for redelivery if important, transmit.
pub struct SendPipeline {
    codec: Arc<WireCodec>,
    reliability: Arc<ReliabilityManager>,
    transport: Arc<dyn Transport>,
}

impl SendPipeline {
    pub fn new(codec: Arc<WireCodec>, reliability: Arc<ReliabilityManager>, transport: Arc<dyn Transport>) -> SendPipeline {
        SendPipeline {
            codec,
            reliability,
            transport,
        }
    }

    pub async fn send_to(&self, to: SocketAddr, kind: MessageKind, body: &[u8], important: bool) -> anyhow::Result<()> {
        let seq = self.reliability.next_sequence(kind).await;
        trace!("sending {:?} seq {} to {}", kind, seq, to);

        let frame = self.codec.encode(kind, seq, important, body)?;
        if important {
            self.reliability.register_pending(to, kind, seq, frame.clone()).await;
        }
        self.transport.send(to, &frame).await;
        Ok(())
    }

    /// The same frame - one sequence number - to every target. An important broadcast gets one
    ///  pending entry per peer, each resolved by that peer's own acknowledgment.
    pub async fn send_to_all(&self, targets: &[SocketAddr], kind: MessageKind, body: &[u8], important: bool) -> anyhow::Result<()> {
        if targets.is_empty() {
            return Ok(());
        }

        let seq = self.reliability.next_sequence(kind).await;
        trace!("sending {:?} seq {} to {} peers", kind, seq, targets.len());

        let frame = self.codec.encode(kind, seq, important, body)?;
        for &to in targets {
            if important {
                self.reliability.register_pending(to, kind, seq, frame.clone()).await;
            }
            self.transport.send(to, &frame).await;
        }
        Ok(())
    }

    pub async fn send_acknowledgment(&self, to: SocketAddr, acknowledged: &Acknowledgment) -> anyhow::Result<()> {
        let mut body = BytesMut::new();
        acknowledged.ser(&mut body);
        self.send_to(to, MessageKind::ACKNOWLEDGMENT, &body, false).await
    }
}
