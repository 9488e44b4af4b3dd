//! Binary packet codec for the speedbeacon discovery/transfer protocol.
//!
//! Every packet starts with a 5-byte header: a 4-byte magic cookie followed by
//! a 1-byte message type.  The body layout is fixed per message type and all
//! integers are big-endian:
//!
//! ```text
//! Offer   : cookie(4) type(1) udp_port(2) tcp_port(2)                        =   9 bytes
//! Request : cookie(4) type(1) file_size(8)                                    =  13 bytes
//! Payload : cookie(4) type(1) total_segments(8) segment_number(8) payload(512) = 533 bytes
//! ```
//!
//! Decoding validates the cookie and message type before any body field is
//! read, then requires the exact length for that type.  Anything else is
//! rejected with a [`WireError`]; callers treat rejected buffers as noise.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic cookie shared by every packet type.
pub const MAGIC_COOKIE: u32 = 0xABCD_DCBA;

/// Size of the opaque payload block carried by each segment.
pub const SEGMENT_PAYLOAD_LEN: usize = 512;

/// Cookie + message type.
pub const HEADER_LEN: usize = 5;

/// Encoded size of an Offer packet.
pub const OFFER_LEN: usize = HEADER_LEN + 2 + 2;

/// Encoded size of a Request packet.
pub const REQUEST_LEN: usize = HEADER_LEN + 8;

/// Encoded size of a Payload packet.
pub const PAYLOAD_LEN: usize = HEADER_LEN + 8 + 8 + SEGMENT_PAYLOAD_LEN;

/// Filler byte written into the payload block. Content is never inspected.
const FILLER: u8 = b'A';

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Reasons a buffer is not a valid packet.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("buffer too short for header ({len} bytes)")]
    Truncated { len: usize },

    #[error("bad magic cookie {0:#010x}")]
    BadCookie(u32),

    #[error("unknown message type {0:#04x}")]
    UnknownType(u8),

    #[error("{kind:?} packet must be {expected} bytes, got {actual}")]
    Length {
        kind: MessageType,
        expected: usize,
        actual: usize,
    },
}

// ---------------------------------------------------------------------------
// MessageType
// ---------------------------------------------------------------------------

/// Message type byte following the cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Offer = 0x02,
    Request = 0x03,
    Payload = 0x04,
}

impl MessageType {
    /// Exact encoded length of a packet of this type.
    pub fn packet_len(self) -> usize {
        match self {
            MessageType::Offer => OFFER_LEN,
            MessageType::Request => REQUEST_LEN,
            MessageType::Payload => PAYLOAD_LEN,
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x02 => Ok(MessageType::Offer),
            0x03 => Ok(MessageType::Request),
            0x04 => Ok(MessageType::Payload),
            other => Err(WireError::UnknownType(other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Packet bodies
// ---------------------------------------------------------------------------

/// Server advertisement naming its transfer ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfferBody {
    pub udp_port: u16,
    pub tcp_port: u16,
}

/// Client request for a UDP transfer of `file_size` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestBody {
    pub file_size: u64,
}

/// One segment of a UDP transfer.
///
/// The 512-byte payload block is filler: it is written on encode and only its
/// length is checked on decode, so it is not stored here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadBody {
    pub total_segments: u64,
    /// 1-based.
    pub segment_number: u64,
}

/// A decoded protocol packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packet {
    Offer(OfferBody),
    Request(RequestBody),
    Payload(PayloadBody),
}

impl Packet {
    pub fn message_type(&self) -> MessageType {
        match self {
            Packet::Offer(_) => MessageType::Offer,
            Packet::Request(_) => MessageType::Request,
            Packet::Payload(_) => MessageType::Payload,
        }
    }

    /// Encoded length of this packet.
    pub fn encoded_len(&self) -> usize {
        self.message_type().packet_len()
    }

    /// Serialize into a freshly allocated buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Append the encoded packet to `dst`.
    pub fn encode_into(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_u32(MAGIC_COOKIE);
        dst.put_u8(self.message_type() as u8);

        match self {
            Packet::Offer(offer) => {
                dst.put_u16(offer.udp_port);
                dst.put_u16(offer.tcp_port);
            }
            Packet::Request(req) => {
                dst.put_u64(req.file_size);
            }
            Packet::Payload(seg) => {
                dst.put_u64(seg.total_segments);
                dst.put_u64(seg.segment_number);
                dst.put_bytes(FILLER, SEGMENT_PAYLOAD_LEN);
            }
        }
    }

    /// Parse a packet, validating cookie, type and exact length.
    pub fn decode(buf: &[u8]) -> Result<Packet, WireError> {
        if buf.len() < HEADER_LEN {
            return Err(WireError::Truncated { len: buf.len() });
        }

        let mut cursor = buf;
        let cookie = cursor.get_u32();
        if cookie != MAGIC_COOKIE {
            return Err(WireError::BadCookie(cookie));
        }
        let kind = MessageType::try_from(cursor.get_u8())?;

        let expected = kind.packet_len();
        if buf.len() != expected {
            return Err(WireError::Length {
                kind,
                expected,
                actual: buf.len(),
            });
        }

        let packet = match kind {
            MessageType::Offer => Packet::Offer(OfferBody {
                udp_port: cursor.get_u16(),
                tcp_port: cursor.get_u16(),
            }),
            MessageType::Request => Packet::Request(RequestBody {
                file_size: cursor.get_u64(),
            }),
            MessageType::Payload => Packet::Payload(PayloadBody {
                total_segments: cursor.get_u64(),
                segment_number: cursor.get_u64(),
            }),
        };

        Ok(packet)
    }
}

/// Number of 512-byte segments needed to carry `file_size` bytes.
pub fn segment_count(file_size: u64) -> u64 {
    file_size.div_ceil(SEGMENT_PAYLOAD_LEN as u64)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_layout() {
        let bytes = Packet::Offer(OfferBody {
            udp_port: 0x1234,
            tcp_port: 0xBEEF,
        })
        .encode();

        assert_eq!(
            bytes.as_ref(),
            &[0xAB, 0xCD, 0xDC, 0xBA, 0x02, 0x12, 0x34, 0xBE, 0xEF]
        );
    }

    #[test]
    fn test_request_layout() {
        let bytes = Packet::Request(RequestBody { file_size: 1_000_000 }).encode();
        assert_eq!(bytes.len(), REQUEST_LEN);
        assert_eq!(bytes[4], 0x03);
        assert_eq!(&bytes[5..], &1_000_000u64.to_be_bytes());
    }

    #[test]
    fn test_payload_layout() {
        let bytes = Packet::Payload(PayloadBody {
            total_segments: 10,
            segment_number: 3,
        })
        .encode();

        assert_eq!(bytes.len(), 533);
        assert_eq!(bytes[4], 0x04);
        assert_eq!(&bytes[5..13], &10u64.to_be_bytes());
        assert_eq!(&bytes[13..21], &3u64.to_be_bytes());
        assert!(bytes[21..].iter().all(|&b| b == FILLER));
    }

    #[test]
    fn test_round_trip_extremes() {
        let packets = [
            Packet::Offer(OfferBody { udp_port: 0, tcp_port: 0 }),
            Packet::Offer(OfferBody {
                udp_port: u16::MAX,
                tcp_port: 1,
            }),
            Packet::Request(RequestBody { file_size: 0 }),
            Packet::Request(RequestBody { file_size: u64::MAX }),
            Packet::Payload(PayloadBody {
                total_segments: u64::MAX,
                segment_number: 1,
            }),
        ];

        for packet in packets {
            let decoded = Packet::decode(&packet.encode()).expect("valid packet");
            assert_eq!(decoded, packet);
        }
    }

    #[test]
    fn test_payload_content_ignored() {
        let mut raw = BytesMut::new();
        Packet::Payload(PayloadBody {
            total_segments: 2,
            segment_number: 2,
        })
        .encode_into(&mut raw);
        for b in raw[21..].iter_mut() {
            *b = 0xFF;
        }

        let decoded = Packet::decode(&raw).unwrap();
        assert!(matches!(
            decoded,
            Packet::Payload(PayloadBody { segment_number: 2, .. })
        ));
    }

    #[test]
    fn test_rejects_bad_cookie() {
        let mut raw = BytesMut::from(&Packet::Request(RequestBody { file_size: 7 }).encode()[..]);
        raw[0] = 0x00;
        assert!(matches!(Packet::decode(&raw), Err(WireError::BadCookie(_))));
    }

    #[test]
    fn test_rejects_unknown_type() {
        let mut raw = BytesMut::from(&Packet::Request(RequestBody { file_size: 7 }).encode()[..]);
        raw[4] = 0x09;
        assert_eq!(Packet::decode(&raw), Err(WireError::UnknownType(0x09)));
    }

    #[test]
    fn test_rejects_wrong_length() {
        let offer = Packet::Offer(OfferBody { udp_port: 1, tcp_port: 2 }).encode();

        // One byte short.
        assert!(matches!(
            Packet::decode(&offer[..OFFER_LEN - 1]),
            Err(WireError::Length { expected: OFFER_LEN, .. })
        ));

        // Trailing garbage.
        let mut long = offer.to_vec();
        long.push(0);
        assert!(matches!(Packet::decode(&long), Err(WireError::Length { .. })));

        // Offer header claiming to be a payload.
        let mut mislabeled = offer.to_vec();
        mislabeled[4] = MessageType::Payload as u8;
        assert!(matches!(
            Packet::decode(&mislabeled),
            Err(WireError::Length {
                kind: MessageType::Payload,
                ..
            })
        ));
    }

    #[test]
    fn test_rejects_truncated_header() {
        assert_eq!(Packet::decode(&[]), Err(WireError::Truncated { len: 0 }));
        assert_eq!(
            Packet::decode(&[0xAB, 0xCD, 0xDC, 0xBA]),
            Err(WireError::Truncated { len: 4 })
        );
    }

    #[test]
    fn test_segment_count() {
        assert_eq!(segment_count(0), 0);
        assert_eq!(segment_count(1), 1);
        assert_eq!(segment_count(512), 1);
        assert_eq!(segment_count(513), 2);
        assert_eq!(segment_count(5_120), 10);
    }
}
