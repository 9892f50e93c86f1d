//! TLV (Type-Length-Value) encoding and the fixed packet header.
//!
//! CCNx TLVs carry a two-byte type and a two-byte length, both in network
//! byte order, followed by `length` bytes of value. Every packet starts
//! with a fixed eight-byte header.

use crate::error::Error;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/* ---------------------------------------------------------------- *\
 * Type codes
\* ---------------------------------------------------------------- */

/// Packet types (second byte of the fixed header).
pub const PKT_TYPE_INTEREST: u8 = 0;
pub const PKT_TYPE_CONTENT: u8 = 1;
pub const PKT_TYPE_NAK: u8 = 2;
pub const PKT_TYPE_CONTROL_REQUEST: u8 = 0xA5;
pub const PKT_TYPE_CONTROL_REPLY: u8 = 0xA6;

/// Message TLV types (outermost TLV of the packet body).
pub const MSG_TYPE_INTEREST: u16 = 1;
pub const MSG_TYPE_CONTENT: u16 = 2;

/// Hop-by-hop header TLV types.
pub const HDR_TLV_INT_LIFETIME: u16 = 1;
pub const HDR_TLV_CACHE_TIME: u16 = 2;

/// Message inner TLV types.
pub const TLV_NAME: u16 = 0;
pub const TLV_PAYLOAD: u16 = 1;
pub const TLV_PAYLOAD_TYPE: u16 = 5;
pub const TLV_MSG_EXPIRY: u16 = 6;
pub const TLV_FINAL_CHUNK: u16 = 7;

/// Payload type discriminator carried by `TLV_PAYLOAD_TYPE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum PayloadType {
    #[default]
    Data = 0,
    Manifest = 1,
}

impl PayloadType {
    pub fn from_u8(v: u8) -> Self {
        if v == 1 {
            PayloadType::Manifest
        } else {
            PayloadType::Data
        }
    }
}

/// Name-component TLV types. A `Chunk` component always terminates the
/// LPM prefix chain.
pub const COMP_TYPE_GENERIC: u16 = 1;
pub const COMP_TYPE_CHUNK: u16 = 16;

/// TLV geometry: two bytes of type, two bytes of length.
pub const TLV_TYPE_LEN: usize = 2;
pub const TLV_LEN_LEN: usize = 2;
pub const TLV_HDR_LEN: usize = TLV_TYPE_LEN + TLV_LEN_LEN;
pub const TLV_MAX_LEN: usize = 0xffff;

/// Protocol version: accept and emit 1 only.
pub const PROTO_VERSION: u8 = 1;

/// Default initial hop limit for interests.
pub const DEFAULT_HOP_LIMIT: u8 = 128;

/// Fixed header + message TLV + name TLV + at least one component TLV.
pub const PACKET_MIN_LEN: usize = PACKET_HDR_LEN + 4 + 4 + 3;

/// NAK error codes, carried in the fixed header's reserved byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NakCode {
    NoRoute = 1,
    HopLimitExceeded = 2,
    ResourceExhausted = 3,
    Congestion = 6,
    MtuExceeded = 7,
}

impl NakCode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(NakCode::NoRoute),
            2 => Some(NakCode::HopLimitExceeded),
            3 => Some(NakCode::ResourceExhausted),
            6 => Some(NakCode::Congestion),
            7 => Some(NakCode::MtuExceeded),
            _ => None,
        }
    }
}

/* ---------------------------------------------------------------- *\
 * Fixed packet header
\* ---------------------------------------------------------------- */

pub const PACKET_HDR_LEN: usize = 8;

/// The eight-byte fixed header at the start of every packet.
///
/// `reserved` doubles as the NAK code on NAK packets and as the RAAQM
/// path label on content packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHdr {
    pub version: u8,
    pub pkt_type: u8,
    pub pkt_len: u16,
    pub hop_limit: u8,
    pub reserved: u8,
    pub flags: u8,
    pub hdr_len: u8,
}

impl PacketHdr {
    pub fn new(pkt_type: u8) -> Self {
        Self {
            version: PROTO_VERSION,
            pkt_type,
            pkt_len: 0,
            hop_limit: DEFAULT_HOP_LIMIT,
            reserved: 0,
            flags: 0,
            hdr_len: PACKET_HDR_LEN as u8,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.version);
        buf.put_u8(self.pkt_type);
        buf.put_u16(self.pkt_len);
        buf.put_u8(self.hop_limit);
        buf.put_u8(self.reserved);
        buf.put_u8(self.flags);
        buf.put_u8(self.hdr_len);
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, Error> {
        if buf.remaining() < PACKET_HDR_LEN {
            return Err(Error::InvalidPacket("short fixed header".into()));
        }
        let hdr = Self {
            version: buf.get_u8(),
            pkt_type: buf.get_u8(),
            pkt_len: buf.get_u16(),
            hop_limit: buf.get_u8(),
            reserved: buf.get_u8(),
            flags: buf.get_u8(),
            hdr_len: buf.get_u8(),
        };
        if hdr.version != PROTO_VERSION {
            return Err(Error::InvalidPacket(format!(
                "unsupported version {}",
                hdr.version
            )));
        }
        Ok(hdr)
    }
}

/* ---------------------------------------------------------------- *\
 * TLV codec
\* ---------------------------------------------------------------- */

/// Encodes a TLV header (type and length) into the buffer.
pub fn encode_tlv_hdr(tlv_type: u16, length: usize, buf: &mut BytesMut) {
    debug_assert!(length <= TLV_MAX_LEN);
    buf.put_u16(tlv_type);
    buf.put_u16(length as u16);
}

/// Encodes a complete TLV (header plus value).
pub fn encode_tlv(tlv_type: u16, value: &[u8], buf: &mut BytesMut) {
    encode_tlv_hdr(tlv_type, value.len(), buf);
    buf.put_slice(value);
}

/// Reads a TLV type from a raw slice without consuming it.
#[inline]
pub fn peek_tlv_type(buf: &[u8]) -> u16 {
    u16::from_be_bytes([buf[0], buf[1]])
}

/// Reads a TLV length from a raw slice without consuming it.
#[inline]
pub fn peek_tlv_length(buf: &[u8]) -> u16 {
    u16::from_be_bytes([buf[2], buf[3]])
}

/// A decoded TLV element.
#[derive(Debug, Clone, PartialEq)]
pub struct TlvElement {
    pub tlv_type: u16,
    pub value: Bytes,
}

impl TlvElement {
    pub fn new(tlv_type: u16, value: impl Into<Bytes>) -> Self {
        Self {
            tlv_type,
            value: value.into(),
        }
    }

    /// Total length of this element when encoded.
    pub fn len(&self) -> usize {
        TLV_HDR_LEN + self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        encode_tlv(self.tlv_type, &self.value, buf);
    }

    pub fn decode(buf: &mut Bytes) -> Result<Self, Error> {
        if buf.remaining() < TLV_HDR_LEN {
            return Err(Error::InvalidPacket("buffer too small for TLV".into()));
        }
        let tlv_type = buf.get_u16();
        let length = buf.get_u16() as usize;
        if buf.remaining() < length {
            return Err(Error::InvalidPacket(format!(
                "TLV value requires {} bytes but only {} available",
                length,
                buf.remaining()
            )));
        }
        let value = buf.split_to(length);
        Ok(Self { tlv_type, value })
    }
}

/// Decodes a variable-length big-endian integer of at most 8 bytes, as
/// used by the hop-by-hop `InterestLifetime` TLV.
pub fn decode_varint(bytes: &[u8]) -> Result<u64, Error> {
    if bytes.is_empty() || bytes.len() > 8 {
        return Err(Error::InvalidPacket(format!(
            "bad variable-length integer of {} bytes",
            bytes.len()
        )));
    }
    let mut v: u64 = 0;
    for b in bytes {
        v = (v << 8) | u64::from(*b);
    }
    Ok(v)
}

/// Encodes `value` as a minimal-width big-endian integer (at least one byte).
pub fn encode_varint(value: u64, buf: &mut BytesMut) -> usize {
    let width = ((64 - u64::leading_zeros(value | 1)) as usize + 7) / 8;
    for i in (0..width).rev() {
        buf.put_u8((value >> (8 * i)) as u8);
    }
    width
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let mut hdr = PacketHdr::new(PKT_TYPE_INTEREST);
        hdr.pkt_len = 100;
        hdr.hop_limit = 32;

        let mut buf = BytesMut::new();
        hdr.encode(&mut buf);
        assert_eq!(buf.len(), PACKET_HDR_LEN);

        let mut frozen = buf.freeze();
        let decoded = PacketHdr::decode(&mut frozen).unwrap();
        assert_eq!(decoded, hdr);
    }

    #[test]
    fn test_header_rejects_bad_version() {
        let mut buf = BytesMut::new();
        let mut hdr = PacketHdr::new(PKT_TYPE_CONTENT);
        hdr.version = 2;
        hdr.encode(&mut buf);

        let mut frozen = buf.freeze();
        assert!(PacketHdr::decode(&mut frozen).is_err());
    }

    #[test]
    fn test_tlv_roundtrip() {
        let mut buf = BytesMut::new();
        encode_tlv(TLV_PAYLOAD, b"abc", &mut buf);
        assert_eq!(buf.len(), 7);
        assert_eq!(&buf[..], &[0, 1, 0, 3, b'a', b'b', b'c']);

        let mut frozen = buf.freeze();
        let e = TlvElement::decode(&mut frozen).unwrap();
        assert_eq!(e.tlv_type, TLV_PAYLOAD);
        assert_eq!(&e.value[..], b"abc");
    }

    #[test]
    fn test_tlv_length_overrun() {
        let mut buf = BytesMut::new();
        buf.put_u16(TLV_PAYLOAD);
        buf.put_u16(10);
        buf.put_slice(b"abc"); // 3 < 10

        let mut frozen = buf.freeze();
        assert!(TlvElement::decode(&mut frozen).is_err());
    }

    #[test]
    fn test_varint() {
        let mut buf = BytesMut::new();
        assert_eq!(encode_varint(0, &mut buf), 1);
        assert_eq!(decode_varint(&buf).unwrap(), 0);

        let mut buf = BytesMut::new();
        assert_eq!(encode_varint(4000, &mut buf), 2);
        assert_eq!(decode_varint(&buf).unwrap(), 4000);

        let mut buf = BytesMut::new();
        assert_eq!(encode_varint(u64::MAX, &mut buf), 8);
        assert_eq!(decode_varint(&buf).unwrap(), u64::MAX);

        assert!(decode_varint(&[0; 9]).is_err());
        assert!(decode_varint(&[]).is_err());
    }
}
