use bytes::{Buf, BufMut, BytesMut};
use crc::Crc;
use sha2::{Digest, Sha256};

use crate::error::NetError;
use crate::wire::message_kind::MessageKind;

/// The fixed-size header preceding every body on the wire. All multi-byte fields are network
///  byte order:
///
/// ```ascii
/// 0:  message kind (i32)
/// 4:  sequence number (u32)
/// 8:  importance flag (u8)
/// 9:  header checksum (u16)
/// 11: body checksum (u32)
/// ```
///
/// The header checksum is computed over the serialized header with both checksum fields
///  zeroed, so header corruption is detected before any other field - importantly the
///  length-derived body offset - is trusted. The body checksum covers the body bytes as
///  transmitted, i.e. the ciphertext for encrypted bodies.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FrameHeader {
    pub kind: MessageKind,
    pub seq: u32,
    pub important: bool,
    pub header_checksum: u16,
    pub body_checksum: u32,
}

impl FrameHeader {
    pub const SERIALIZED_LEN: usize = 15;

    pub fn for_body(kind: MessageKind, seq: u32, important: bool, body: &[u8]) -> FrameHeader {
        FrameHeader {
            kind,
            seq,
            important,
            header_checksum: header_checksum(kind.0, seq, important as u8),
            body_checksum: body_checksum(body),
        }
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_i32(self.kind.0);
        buf.put_u32(self.seq);
        buf.put_u8(self.important as u8);
        buf.put_u16(self.header_checksum);
        buf.put_u32(self.body_checksum);
    }

    /// Read and verify a header. The checksum comparison happens on the raw field values,
    ///  before the importance flag is interpreted, so a corrupted header is rejected without
    ///  trusting any of its contents.
    pub fn try_deser(buf: &mut impl Buf) -> Result<FrameHeader, NetError> {
        if buf.remaining() < Self::SERIALIZED_LEN {
            return Err(NetError::MalformedFrame("datagram shorter than header".to_string()));
        }

        let kind_raw = buf.get_i32();
        let seq = buf.get_u32();
        let important_raw = buf.get_u8();
        let stored_header_checksum = buf.get_u16();
        let body_checksum = buf.get_u32();

        if header_checksum(kind_raw, seq, important_raw) != stored_header_checksum {
            return Err(NetError::MalformedFrame("header checksum mismatch".to_string()));
        }

        let important = match important_raw {
            0 => false,
            1 => true,
            n => {
                return Err(NetError::MalformedFrame(format!("invalid importance flag {}", n)));
            }
        };

        Ok(FrameHeader {
            kind: MessageKind(kind_raw),
            seq,
            important,
            header_checksum: stored_header_checksum,
            body_checksum,
        })
    }
}

fn header_checksum(kind_raw: i32, seq: u32, important_raw: u8) -> u16 {
    let mut scratch = [0u8; FrameHeader::SERIALIZED_LEN];
    scratch[0..4].copy_from_slice(&kind_raw.to_be_bytes());
    scratch[4..8].copy_from_slice(&seq.to_be_bytes());
    scratch[8] = important_raw;
    // bytes 9..15 stay zero: the checksum fields are excluded from the computation

    Crc::<u16>::new(&crc::CRC_16_IBM_SDLC).checksum(&scratch)
}

pub fn body_checksum(body: &[u8]) -> u32 {
    let digest = Sha256::digest(body);
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::application(MessageKind(1), 1, false)]
    #[case::important(MessageKind(4), 829, true)]
    #[case::control(MessageKind::ACKNOWLEDGMENT, 0, false)]
    #[case::max_seq(MessageKind(i32::MAX), u32::MAX, true)]
    fn test_header_ser_roundtrip(#[case] kind: MessageKind, #[case] seq: u32, #[case] important: bool) {
        let original = FrameHeader::for_body(kind, seq, important, b"some body");

        let mut buf = BytesMut::new();
        original.ser(&mut buf);
        assert_eq!(buf.len(), FrameHeader::SERIALIZED_LEN);

        let mut b: &[u8] = &buf;
        let deser = FrameHeader::try_deser(&mut b).unwrap();
        assert!(b.is_empty());
        assert_eq!(deser, original);
    }

    #[test]
    fn test_header_checksum_ignores_checksum_fields() {
        // same first nine bytes, different body checksum: the header checksum must not change
        let a = FrameHeader::for_body(MessageKind(7), 12, true, b"body one");
        let b = FrameHeader::for_body(MessageKind(7), 12, true, b"a different body");

        assert_ne!(a.body_checksum, b.body_checksum);
        assert_eq!(a.header_checksum, b.header_checksum);
    }

    #[rstest]
    #[case::empty(b"" as &[u8])]
    #[case::one_byte(b"\x01")]
    #[case::fourteen_bytes(b"\0\0\0\x01\0\0\0\x02\x01\0\0\0\0\0")]
    fn test_truncated_header_is_rejected(#[case] mut buf: &[u8]) {
        let result = FrameHeader::try_deser(&mut buf);
        assert!(matches!(result, Err(NetError::MalformedFrame(_))));
    }

    #[test]
    fn test_corrupted_importance_flag_is_rejected() {
        let header = FrameHeader::for_body(MessageKind(2), 5, true, b"");
        let mut buf = BytesMut::new();
        header.ser(&mut buf);

        // an importance byte outside {0, 1} with a fixed-up checksum must still be rejected
        let mut raw = buf.to_vec();
        raw[8] = 2;
        let checksum = header_checksum(2, 5, 2);
        raw[9..11].copy_from_slice(&checksum.to_be_bytes());

        let result = FrameHeader::try_deser(&mut raw.as_slice());
        assert!(matches!(result, Err(NetError::MalformedFrame(_))));
    }

    #[test]
    fn test_body_checksum_is_body_sensitive() {
        assert_eq!(body_checksum(b"abc"), body_checksum(b"abc"));
        assert_ne!(body_checksum(b"abc"), body_checksum(b"abd"));
        assert_ne!(body_checksum(b""), body_checksum(b"\0"));
    }
}
