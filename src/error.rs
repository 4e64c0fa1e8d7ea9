use std::net::SocketAddr;

use thiserror::Error;

use crate::wire::message_kind::MessageKind;

/// Failure categories of the messaging layer. None of these terminate processing: malformed
///  datagrams are dropped, unknown senders are ignored, abandoned deliveries are surfaced as
///  events. The worst observable outcome of any of them is a disconnected peer.
#[derive(Debug, Error)]
pub enum NetError {
    /// checksum mismatch, truncated header or failed decryption - the datagram is dropped
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// a message from an address that did not complete a handshake first
    #[error("message from unknown peer {0}")]
    UnknownPeer(SocketAddr),

    /// an important message exceeded the retry ceiling; the peer is presumed unreachable
    #[error("delivery of {kind:?} seq {seq} to {peer} abandoned")]
    DeliveryAbandoned {
        peer: SocketAddr,
        kind: MessageKind,
        seq: u32,
    },

    /// socket-level send / receive error
    #[error("transport failure: {0}")]
    Transport(#[from] std::io::Error),
}
