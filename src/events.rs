use std::net::SocketAddr;

use tokio::sync::broadcast;
use tracing::trace;

use crate::session::PeerId;
use crate::wire::message_kind::MessageKind;

/// Notifications for the application layer: peers appearing and disappearing, and important
///  messages the layer gave up on. Decoded payloads are not delivered here but through the
///  registered message handlers.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NetEvent {
    PeerConnected(PeerConnectedData),
    PeerDisconnected(PeerDisconnectedData),
    DeliveryAbandoned(DeliveryAbandonedData),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PeerConnectedData {
    pub peer: PeerId,
    pub addr: SocketAddr,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PeerDisconnectedData {
    pub peer: PeerId,
    pub addr: SocketAddr,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeliveryAbandonedData {
    pub peer: SocketAddr,
    pub kind: MessageKind,
    pub seq: u32,
    pub retries: u32,
}

pub struct NetEventNotifier {
    sender: broadcast::Sender<NetEvent>,
}
impl NetEventNotifier {
    pub fn new() -> NetEventNotifier {
        let (sender, _) = broadcast::channel(128);

        NetEventNotifier {
            sender
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NetEvent> {
        self.sender.subscribe()
    }

    pub fn send_event(&self, event: NetEvent) {
        trace!("event: {:?}", event);
        let _ = self.sender.send(event);
    }
}
