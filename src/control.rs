use std::net::{SocketAddr, SocketAddrV4, SocketAddrV6};

use anyhow::anyhow;
use bytes::{Buf, BufMut, BytesMut};
use bytes_varint::try_get_fixed::TryGetFixedSupport;
use bytes_varint::{VarIntSupport, VarIntSupportMut};
use num_enum::TryFromPrimitive;

use crate::session::PeerId;
use crate::wire::message_kind::MessageKind;

/// Body of an acknowledgment frame: the (kind, sequence number) pair being confirmed. The
///  sender's address identifies which peer's pending entry it resolves.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Acknowledgment {
    pub kind: MessageKind,
    pub seq: u32,
}
impl Acknowledgment {
    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_i32(self.kind.0);
        buf.put_u32(self.seq);
    }

    pub fn try_deser(buf: &mut impl Buf) -> anyhow::Result<Acknowledgment> {
        let kind = MessageKind(buf.try_get_u32()? as i32);
        let seq = buf.try_get_u32()?;
        Ok(Acknowledgment {
            kind,
            seq,
        })
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, TryFromPrimitive)]
#[repr(u8)]
enum HandshakeKind {
    Request = 0,
    Accept = 1,
}

/// Handshake bodies. A joining peer sends `Request`; the receiving side assigns a peer id and
///  answers with `Accept`, carrying that id plus the current roster so the newcomer learns the
///  existing membership in one round trip.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Handshake {
    Request,
    Accept {
        assigned: PeerId,
        roster: Vec<(PeerId, SocketAddr)>,
    },
}
impl Handshake {
    pub fn ser(&self, buf: &mut BytesMut) {
        match self {
            Handshake::Request => {
                buf.put_u8(HandshakeKind::Request as u8);
            }
            Handshake::Accept { assigned, roster } => {
                buf.put_u8(HandshakeKind::Accept as u8);
                buf.put_u32(assigned.0);
                buf.put_usize_varint(roster.len());
                for (id, addr) in roster {
                    buf.put_u32(id.0);
                    ser_addr(addr, buf);
                }
            }
        }
    }

    pub fn try_deser(buf: &mut impl Buf) -> anyhow::Result<Handshake> {
        let kind = HandshakeKind::try_from(buf.try_get_u8()?)
            .map_err(|e| anyhow!("invalid handshake discriminator: {}", e))?;

        match kind {
            HandshakeKind::Request => Ok(Handshake::Request),
            HandshakeKind::Accept => {
                let assigned = PeerId(buf.try_get_u32()?);
                let num_peers = buf.try_get_usize_varint()?;
                let mut roster = Vec::with_capacity(num_peers);
                for _ in 0..num_peers {
                    let id = PeerId(buf.try_get_u32()?);
                    let addr = try_deser_addr(buf)?;
                    roster.push((id, addr));
                }
                Ok(Handshake::Accept {
                    assigned,
                    roster,
                })
            }
        }
    }
}

fn ser_addr(addr: &SocketAddr, buf: &mut impl BufMut) {
    match addr {
        SocketAddr::V4(data) => {
            buf.put_u8(4);
            buf.put_u32(data.ip().to_bits());
            buf.put_u16(data.port());
        }
        SocketAddr::V6(data) => {
            buf.put_u8(6);
            buf.put_u128(data.ip().to_bits());
            buf.put_u16(data.port());
        }
    }
}

fn try_deser_addr(buf: &mut impl Buf) -> anyhow::Result<SocketAddr> {
    match buf.try_get_u8()? {
        4 => {
            let ip = buf.try_get_u32()?;
            let port = buf.try_get_u16()?;
            Ok(SocketAddr::V4(SocketAddrV4::new(ip.into(), port)))
        }
        6 => {
            let ip = buf.try_get_u128()?;
            let port = buf.try_get_u16()?;
            Ok(SocketAddr::V6(SocketAddrV6::new(ip.into(), port, 0, 0)))
        }
        n => {
            Err(anyhow!("invalid socket address discriminator: {}", n))
        }
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::ack(MessageKind(1), 42)]
    #[case::control_kind(MessageKind::HANDSHAKE, 1)]
    #[case::max_seq(MessageKind(0), u32::MAX)]
    fn test_acknowledgment_roundtrip(#[case] kind: MessageKind, #[case] seq: u32) {
        let original = Acknowledgment { kind, seq };

        let mut buf = BytesMut::new();
        original.ser(&mut buf);
        assert_eq!(buf.len(), 8);

        let mut b: &[u8] = &buf;
        let deser = Acknowledgment::try_deser(&mut b).unwrap();
        assert!(b.is_empty());
        assert_eq!(deser, original);
    }

    #[test]
    fn test_acknowledgment_truncated() {
        let mut buf: &[u8] = b"\0\0\0\x01\0";
        assert!(Acknowledgment::try_deser(&mut buf).is_err());
    }

    #[rstest]
    #[case::request(Handshake::Request)]
    #[case::accept_empty_roster(Handshake::Accept { assigned: PeerId(1), roster: vec![] })]
    #[case::accept_v4(Handshake::Accept {
        assigned: PeerId(3),
        roster: vec![
            (PeerId(1), SocketAddr::from_str("1.2.3.4:5678").unwrap()),
            (PeerId(2), SocketAddr::from_str("9.8.7.6:1234").unwrap()),
        ],
    })]
    #[case::accept_mixed(Handshake::Accept {
        assigned: PeerId(2),
        roster: vec![
            (PeerId(1), SocketAddr::from_str("[2001:db8::17]:9000").unwrap()),
            (PeerId(7), SocketAddr::from_str("127.0.0.1:16385").unwrap()),
        ],
    })]
    fn test_handshake_roundtrip(#[case] original: Handshake) {
        let mut buf = BytesMut::new();
        original.ser(&mut buf);

        let mut b: &[u8] = &buf;
        let deser = Handshake::try_deser(&mut b).unwrap();
        assert!(b.is_empty());
        assert_eq!(deser, original);
    }

    #[rstest]
    #[case::empty(b"" as &[u8])]
    #[case::bad_discriminator(b"\x07")]
    #[case::truncated_accept(b"\x01\0\0\0\x03\x01\0")]
    #[case::bad_addr_discriminator(b"\x01\0\0\0\x03\x01\0\0\0\x01\x05")]
    fn test_handshake_deser_failures(#[case] mut buf: &[u8]) {
        assert!(Handshake::try_deser(&mut buf).is_err());
    }
}
