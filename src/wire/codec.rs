use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use rustc_hash::FxHashSet;

use crate::error::NetError;
use crate::wire::crypto::PayloadCrypto;
use crate::wire::header::{body_checksum, FrameHeader};
use crate::wire::message_kind::MessageKind;

/// a decoded datagram: verified header fields plus the (decrypted, for critical kinds) body
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Frame {
    pub kind: MessageKind,
    pub seq: u32,
    pub important: bool,
    pub body: Bytes,
}

/// Turns (kind, seq, importance, body) into wire frames and back. Bodies of kinds in the
///  critical set pass through [PayloadCrypto] - encryption happens before checksum
///  computation on the way out, decryption after checksum verification on the way in, so a
///  tampered frame is rejected without touching the cipher.
pub struct WireCodec {
    crypto: Arc<dyn PayloadCrypto>,
    critical_kinds: FxHashSet<MessageKind>,
}

impl WireCodec {
    pub fn new(crypto: Arc<dyn PayloadCrypto>, critical_kinds: FxHashSet<MessageKind>) -> WireCodec {
        WireCodec {
            crypto,
            critical_kinds,
        }
    }

    pub fn is_critical(&self, kind: MessageKind) -> bool {
        self.critical_kinds.contains(&kind)
    }

    pub fn encode(&self, kind: MessageKind, seq: u32, important: bool, body: &[u8]) -> anyhow::Result<Bytes> {
        let encrypted;
        let body = if self.is_critical(kind) {
            encrypted = self.crypto.encrypt(body)?;
            encrypted.as_slice()
        } else {
            body
        };

        let header = FrameHeader::for_body(kind, seq, important, body);

        let mut buf = BytesMut::with_capacity(FrameHeader::SERIALIZED_LEN + body.len());
        header.ser(&mut buf);
        buf.extend_from_slice(body);
        Ok(buf.freeze())
    }

    pub fn decode(&self, datagram: &[u8]) -> Result<Frame, NetError> {
        let mut rest = datagram;
        let header = FrameHeader::try_deser(&mut rest)?;
        let body = rest;

        if body_checksum(body) != header.body_checksum {
            return Err(NetError::MalformedFrame("body checksum mismatch".to_string()));
        }

        let body = if self.is_critical(header.kind) {
            Bytes::from(self.crypto.decrypt(body)?)
        } else {
            Bytes::copy_from_slice(body)
        };

        Ok(Frame {
            kind: header.kind,
            seq: header.seq,
            important: header.important,
            body,
        })
    }
}
