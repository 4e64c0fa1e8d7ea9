use std::collections::hash_map::Entry;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::BytesMut;
use rustc_hash::FxHashMap;
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

use crate::control::{Acknowledgment, Handshake};
use crate::error::NetError;
use crate::reliability::ReliabilityManager;
use crate::send_pipeline::SendPipeline;
use crate::session::{PeerId, SessionRegistry};
use crate::wire::codec::{Frame, WireCodec};
use crate::wire::message_kind::{ControlKind, MessageKind};

/// Application callback for one message kind. Handlers run on the thread driving the endpoint
///  tick - never on the receive task - so a handler sees messages one at a time.
///
/// The body passed in is verified (and decrypted, for critical kinds); handlers never touch
///  frame bytes.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn on_message(&self, body: &[u8], sender: SocketAddr);
}

/// Routes decoded frames to registered handlers. Control traffic is handled internally:
///  acknowledgments resolve pending entries, heartbeats stamp the session registry, handshakes
///  register peers and answer with the assigned id plus the current roster.
///
/// Important messages are acknowledged *before* their handler runs, so a slow or failing
///  handler cannot suppress delivery confirmation.
pub struct DispatchEngine {
    codec: Arc<WireCodec>,
    pipeline: Arc<SendPipeline>,
    reliability: Arc<ReliabilityManager>,
    sessions: Arc<SessionRegistry>,
    handlers: RwLock<FxHashMap<MessageKind, Arc<dyn MessageHandler>>>,
}

impl DispatchEngine {
    pub fn new(
        codec: Arc<WireCodec>,
        pipeline: Arc<SendPipeline>,
        reliability: Arc<ReliabilityManager>,
        sessions: Arc<SessionRegistry>,
    ) -> DispatchEngine {
        DispatchEngine {
            codec,
            pipeline,
            reliability,
            sessions,
            handlers: Default::default(),
        }
    }

    pub async fn register_handler(&self, kind: MessageKind, handler: Arc<dyn MessageHandler>) -> anyhow::Result<()> {
        if kind.is_control() {
            return Err(anyhow!("cannot register a handler for reserved control kind {:?}", kind));
        }
        match self.handlers.write().await.entry(kind) {
            Entry::Occupied(_) => {
                Err(anyhow!("registering a second handler for message kind {:?}", kind))
            }
            Entry::Vacant(e) => {
                e.insert(handler);
                Ok(())
            }
        }
    }

    /// Decode and route one datagram. All failures are contained here - logged and dropped,
    ///  never propagated into the caller's control flow, so one bad datagram cannot affect
    ///  the processing of subsequent ones.
    pub async fn dispatch(&self, datagram: &[u8], sender: SocketAddr) {
        if let Err(e) = self.try_dispatch(datagram, sender).await {
            warn!("dropping datagram from {}: {}", sender, e);
        }
    }

    async fn try_dispatch(&self, datagram: &[u8], sender: SocketAddr) -> Result<(), NetError> {
        let frame = self.codec.decode(datagram)?;
        trace!("received {:?} seq {} from {}", frame.kind, frame.seq, sender);

        if frame.kind == MessageKind::ACKNOWLEDGMENT {
            return self.on_acknowledgment(&frame, sender).await;
        }

        // Ack first: delivery confirmation must not depend on the handler. A duplicate still
        //  owes an ack - the first one may have been lost.
        if frame.important {
            let acknowledged = Acknowledgment { kind: frame.kind, seq: frame.seq };
            if let Err(e) = self.pipeline.send_acknowledgment(sender, &acknowledged).await {
                warn!("error acknowledging {:?} seq {} to {}: {}", frame.kind, frame.seq, sender, e);
            }
        }

        if !self.reliability.is_new_message(sender, frame.kind, frame.seq).await {
            debug!("duplicate {:?} seq {} from {} - not dispatching again", frame.kind, frame.seq, sender);
            return Ok(());
        }

        match frame.kind.as_control() {
            Some(ControlKind::Acknowledgment) => Ok(()), // handled above
            Some(ControlKind::Heartbeat) => self.on_heartbeat(sender).await,
            Some(ControlKind::Handshake) => self.on_handshake(&frame, sender).await,
            None if frame.kind.is_control() => {
                warn!("unknown control kind {:?} from {} - dropping", frame.kind, sender);
                Ok(())
            }
            None => self.on_application_message(&frame, sender).await,
        }
    }

    async fn on_acknowledgment(&self, frame: &Frame, sender: SocketAddr) -> Result<(), NetError> {
        let mut buf: &[u8] = &frame.body;
        let acknowledged = Acknowledgment::try_deser(&mut buf)
            .map_err(|e| NetError::MalformedFrame(format!("invalid acknowledgment body: {}", e)))?;

        self.reliability.on_acknowledged(sender, acknowledged.kind, acknowledged.seq).await;
        Ok(())
    }

    async fn on_heartbeat(&self, sender: SocketAddr) -> Result<(), NetError> {
        if !self.sessions.update_heartbeat(sender).await {
            return Err(NetError::UnknownPeer(sender));
        }
        Ok(())
    }

    async fn on_handshake(&self, frame: &Frame, sender: SocketAddr) -> Result<(), NetError> {
        let mut buf: &[u8] = &frame.body;
        let handshake = Handshake::try_deser(&mut buf)
            .map_err(|e| NetError::MalformedFrame(format!("invalid handshake body: {}", e)))?;

        match handshake {
            Handshake::Request => {
                let id = self.sessions.add_peer(sender).await;
                self.sessions.update_heartbeat(sender).await;

                let accept = Handshake::Accept {
                    assigned: id,
                    roster: self.sessions.peers().await,
                };
                let mut body = BytesMut::new();
                accept.ser(&mut body);
                if let Err(e) = self.pipeline.send_to(sender, MessageKind::HANDSHAKE, &body, true).await {
                    warn!("error sending handshake accept to {}: {}", sender, e);
                }
            }
            Handshake::Accept { assigned, roster } => {
                debug!("joined as {:?}; roster carries {} peers", assigned, roster.len());
                self.sessions.set_local_id(assigned).await;
                self.sessions.add_peer_with_id(sender, PeerId::SERVER).await;
                self.sessions.update_heartbeat(sender).await;

                for (id, addr) in roster {
                    if id == assigned {
                        continue; // our own roster entry
                    }
                    self.sessions.add_peer_with_id(addr, id).await;
                }
            }
        }
        Ok(())
    }

    async fn on_application_message(&self, frame: &Frame, sender: SocketAddr) -> Result<(), NetError> {
        if !self.sessions.contains(sender).await {
            return Err(NetError::UnknownPeer(sender));
        }

        let handler = self.handlers.read().await.get(&frame.kind).cloned();
        match handler {
            Some(handler) => {
                handler.on_message(&frame.body, sender).await;
                Ok(())
            }
            None => {
                warn!("no handler registered for {:?} - dropping message from {}", frame.kind, sender);
                Ok(())
            }
        }
    }
}
